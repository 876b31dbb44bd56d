use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    // Word runs joined by a single '/', '.' or '-' stay one token so that
    // import paths and dotted hosts survive tokenization.
    static ref RE: Regex = Regex::new(
        r"(?u)[\p{L}\p{N}_][\p{L}\p{N}_']*(?:[./\-][\p{L}\p{N}_][\p{L}\p{N}_']*)*"
    )
    .expect("valid regex");
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

pub fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

/// NFKC-normalize and case-fold a single token without splitting it.
pub fn normalize(token: &str) -> String {
    token.nfkc().collect::<String>().to_lowercase()
}

/// Tokenize query text using NFKC normalization, lowercasing and stopword
/// removal. Compounds such as `net/http` stay whole. Tokens keep their order
/// and repeats.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    RE.find_iter(&normalized)
        .map(|m| m.as_str())
        .filter(|t| !is_stopword(t))
        .map(str::to_string)
        .collect()
}

/// Tokenize document text. Each compound is followed by its `/`-separated
/// segments and then its plain words, so `JSON-RPC` indexes `json-rpc`,
/// `json` and `rpc`.
pub fn tokenize_with_parts(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let mut out = Vec::new();
    for compound in RE.find_iter(&normalized).map(|m| m.as_str()) {
        let start = out.len();
        let mut emit = |t: &str| {
            if !t.is_empty() && !is_stopword(t) && !out[start..].iter().any(|seen: &String| seen == t) {
                out.push(t.to_string());
            }
        };
        emit(compound);
        if compound.contains('/') {
            compound.split('/').for_each(&mut emit);
        }
        compound.split(['/', '.', '-']).for_each(&mut emit);
    }
    out
}
