//! This module provides types for representing tags (used to organize images) and tag queries (used to filter
//! images according to their tags).
//!
//! A query string such as `sunset, artist:someone, -(red | blue)` is first tokenized into a typed token stream
//! and then parsed by recursive descent into a [TagQuery] tree.  Parsing is infallible by design: malformed
//! terms are discarded and a query which cannot be parsed at all degrades to the empty conjunction, which
//! matches every image.

use {
    anyhow::{anyhow, Error, Result},
    serde::{Deserializer, Serializer},
    serde_derive::{Deserialize, Serialize},
    std::{
        collections::BTreeSet,
        fmt::{self, Display},
        str::FromStr,
    },
};

/// The closed set of categories which partition the tag namespace
///
/// The same tag name may exist independently in two categories, e.g. `red` and `artist:red` are distinct tags.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagCategory {
    General,
    Artist,
    Character,
    Copyright,
    Metadata,
}

impl TagCategory {
    /// All valid categories, in display order.
    pub const ALL: [TagCategory; 5] = [
        TagCategory::General,
        TagCategory::Artist,
        TagCategory::Character,
        TagCategory::Copyright,
        TagCategory::Metadata,
    ];
}

impl FromStr for TagCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "general" => Self::General,
            "artist" => Self::Artist,
            "character" => Self::Character,
            "copyright" => Self::Copyright,
            "metadata" => Self::Metadata,
            _ => return Err(anyhow!("unrecognized tag category: {s}")),
        })
    }
}

impl Display for TagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::General => "general",
            Self::Artist => "artist",
            Self::Character => "character",
            Self::Copyright => "copyright",
            Self::Metadata => "metadata",
        })
    }
}

/// Represents a tag attached to zero or more images
///
/// Tag names are case-folded to lowercase everywhere; a tag is identified by its (name, category) pair.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Clone, Hash)]
pub struct Tag {
    /// The category to which this tag belongs
    pub category: TagCategory,

    /// The lowercase name of this tag
    pub name: String,
}

impl FromStr for Tag {
    type Err = Error;

    /// Parse a `Tag` from a string, e.g. "artist:someone" or "sunset".
    ///
    /// A prefix which is not one of the valid categories is not an error: the whole token, colon included, is
    /// treated as a general-category literal name.  Commas are rejected since they separate tags in every
    /// list context (queries, batch requests, and the stored tag summaries).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();

        let (category, name) = match s.split_once(':') {
            Some((prefix, rest)) => match prefix.parse::<TagCategory>() {
                Ok(category) if !rest.is_empty() => (category, rest.to_owned()),
                _ => (TagCategory::General, s),
            },
            None => (TagCategory::General, s),
        };

        if name.is_empty() {
            Err(anyhow!("empty tag name"))
        } else if name.contains(',') {
            Err(anyhow!("tag name may not contain a comma: {name}"))
        } else {
            Ok(Tag { category, name })
        }
    }
}

impl Display for Tag {
    /// Convert a `Tag` to a string, e.g. "artist:someone", or just "sunset" for general tags.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let TagCategory::General = self.category {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}:{}", self.category, self.name)
        }
    }
}

impl<'de> serde::Deserialize<'de> for Tag {
    /// Deserialize a `Tag` using `Tag::from_str`.
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer)?
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

impl serde::Serialize for Tag {
    /// Serialize a `Tag` using `Tag::fmt`.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Parse a comma-separated list of possibly category-prefixed tag names into a set of tags, silently dropping
/// empty or unparseable entries.
pub fn parse_tag_list(text: &str) -> BTreeSet<Tag> {
    text.split(',').filter_map(|s| s.parse().ok()).collect()
}

/// A single tag predicate within a query
///
/// Matches images carrying at least one tag whose name matches `name` (exactly, or per the `*` wildcard
/// position) and whose category equals `category` if specified.  An unqualified pattern matches tags in *all*
/// categories, so users need not remember category prefixes when searching.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct TagPattern {
    /// The category to match, or `None` to match any category
    pub category: Option<TagCategory>,

    /// The lowercase name or wildcard pattern to match
    pub name: String,

    /// Whether `name` contains a `*` wildcard
    pub wildcard: bool,
}

impl TagPattern {
    /// Parse a pattern from a single (already lowercase) query word, returning `None` if no tag name remains.
    fn parse(word: &str) -> Option<Self> {
        let (category, name) = match word.split_once(':') {
            Some((prefix, rest)) => match prefix.parse::<TagCategory>() {
                Ok(category) if !rest.is_empty() => (Some(category), rest),
                _ => (None, word),
            },
            None => (None, word),
        };

        if name.is_empty() {
            None
        } else {
            Some(TagPattern {
                category,
                name: name.to_owned(),
                wildcard: name.contains('*'),
            })
        }
    }

    /// Determine whether this pattern matches the specified `tag`.
    ///
    /// Only the first `*` acts as a wildcard, matching zero or more characters; any further `*` characters are
    /// literal.
    pub fn matches(&self, tag: &Tag) -> bool {
        if let Some(category) = self.category {
            if tag.category != category {
                return false;
            }
        }

        if self.wildcard {
            let (prefix, suffix) = self.name.split_once('*').unwrap_or((&self.name, ""));

            tag.name.len() >= prefix.len() + suffix.len()
                && tag.name.starts_with(prefix)
                && tag.name.ends_with(suffix)
        } else {
            tag.name == self.name
        }
    }
}

/// Represents a boolean query used to filter images according to their tags
#[derive(Debug, Eq, PartialEq, Clone)]
pub enum TagQuery {
    /// Match when every child matches (the empty conjunction matches everything)
    And(Vec<TagQuery>),

    /// Match when at least one child matches
    Or(Vec<TagQuery>),

    /// Match when the child does *not* match
    Not(Box<TagQuery>),

    /// Match when the image has at least one tag matching the pattern
    Tag(TagPattern),

    /// Match images with no tags at all
    Untagged,
}

impl TagQuery {
    /// Whether this query places no constraint on images, i.e. is the empty conjunction.
    pub fn is_match_all(&self) -> bool {
        matches!(self, TagQuery::And(children) if children.is_empty())
    }

    /// Visit each leaf pattern in the query, left to right, folding over them using `value` as the initial
    /// value and `fold` as the folding function.
    ///
    /// The traversal order is deterministic, which allows SQL text generation and parameter binding to walk
    /// the tree independently yet stay aligned.
    pub fn fold_patterns<'a, T>(
        &'a self,
        value: T,
        fold: impl Fn(T, &'a TagPattern) -> T + Copy,
    ) -> T {
        match self {
            TagQuery::And(children) | TagQuery::Or(children) => children
                .iter()
                .fold(value, |value, child| child.fold_patterns(value, fold)),
            TagQuery::Not(child) => child.fold_patterns(value, fold),
            TagQuery::Tag(pattern) => fold(value, pattern),
            TagQuery::Untagged => value,
        }
    }

    /// Evaluate this query against the complete tag set of a single image.
    ///
    /// This is the in-memory reference semantics; the server pushes the same logic down to SQL when searching.
    pub fn matches(&self, tags: &BTreeSet<Tag>) -> bool {
        match self {
            TagQuery::And(children) => children.iter().all(|child| child.matches(tags)),
            TagQuery::Or(children) => children.iter().any(|child| child.matches(tags)),
            TagQuery::Not(child) => !child.matches(tags),
            TagQuery::Tag(pattern) => tags.iter().any(|tag| pattern.matches(tag)),
            TagQuery::Untagged => tags.is_empty(),
        }
    }
}

/// Parse a raw query string into a [TagQuery].
///
/// This never fails; see the module documentation for how malformed input degrades.
pub fn parse(query: &str) -> TagQuery {
    let mut parser = Parser {
        tokens: tokenize(query),
        position: 0,
    };

    parser.parse_sequence(false)
}

/// A structural token produced by [tokenize]
#[derive(Debug, Eq, PartialEq, Clone)]
enum Token {
    /// A comma or the word `and`, separating conjoined terms
    Comma,

    /// A `|` or the word `or`, separating alternatives
    Pipe,

    /// A `-` prefixing a negated term
    Minus,

    LParen,
    RParen,

    /// A tag name, possibly category-prefixed and/or containing a `*` wildcard
    Word(String),
}

/// Split a raw query string into tokens in a single left-to-right scan.
///
/// `-` is an operator only at the start of a token, so names like "foo-bar" survive intact.  The words `and`
/// and `or` (any case) are normalized to the equivalent operator tokens.
fn tokenize(query: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut word = String::new();

    let flush = |tokens: &mut Vec<Token>, word: &mut String| {
        if !word.is_empty() {
            if word.eq_ignore_ascii_case("and") {
                tokens.push(Token::Comma);
            } else if word.eq_ignore_ascii_case("or") {
                tokens.push(Token::Pipe);
            } else {
                tokens.push(Token::Word(word.clone()));
            }

            word.clear();
        }
    };

    for c in query.chars() {
        match c {
            ',' => {
                flush(&mut tokens, &mut word);
                tokens.push(Token::Comma);
            }
            '|' => {
                flush(&mut tokens, &mut word);
                tokens.push(Token::Pipe);
            }
            '(' => {
                flush(&mut tokens, &mut word);
                tokens.push(Token::LParen);
            }
            ')' => {
                flush(&mut tokens, &mut word);
                tokens.push(Token::RParen);
            }
            '-' if word.is_empty() => tokens.push(Token::Minus),
            c if c.is_whitespace() => flush(&mut tokens, &mut word),
            c => word.push(c),
        }
    }

    flush(&mut tokens, &mut word);

    tokens
}

/// Recursive-descent parser over a token stream
struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();

        if token.is_some() {
            self.position += 1;
        }

        token
    }

    /// Parse a comma-separated sequence of terms into a conjunction, stopping at the closing parenthesis when
    /// `in_group` is set.
    ///
    /// A single-term sequence collapses to the term itself; an empty sequence is the match-all conjunction.
    fn parse_sequence(&mut self, in_group: bool) -> TagQuery {
        let mut terms = Vec::new();

        loop {
            match self.peek() {
                None => break,
                Some(Token::Comma) | Some(Token::Pipe) => {
                    self.advance();
                }
                Some(Token::RParen) => {
                    // A stray ')' at the top level is discarded; inside a group it ends the group.
                    self.advance();

                    if in_group {
                        break;
                    }
                }
                _ => {
                    if let Some(term) = self.parse_or_chain() {
                        terms.push(term);
                    }
                }
            }
        }

        if terms.len() == 1 {
            terms.pop().unwrap()
        } else {
            TagQuery::And(terms)
        }
    }

    /// Parse a term and any `|`-joined alternatives which follow it, folding them into a disjunction.
    fn parse_or_chain(&mut self) -> Option<TagQuery> {
        let mut members = Vec::new();

        if let Some(term) = self.parse_term() {
            members.push(term);
        }

        while matches!(self.peek(), Some(Token::Pipe)) {
            self.advance();

            if let Some(term) = self.parse_term() {
                members.push(term);
            }
        }

        match members.len() {
            0 => None,
            1 => members.pop(),
            _ => Some(TagQuery::Or(members)),
        }
    }

    /// Parse a single term: an optional `-`, then either a word or a parenthesized group.
    ///
    /// Returns `None` (discarding any tokens consumed) if the term turns out to be empty or malformed.
    fn parse_term(&mut self) -> Option<TagQuery> {
        match self.advance()? {
            Token::Minus => self.parse_term().map(|term| TagQuery::Not(Box::new(term))),
            Token::LParen => {
                let group = self.parse_sequence(true);

                // An empty group contributes nothing.
                if group.is_match_all() {
                    None
                } else {
                    Some(group)
                }
            }
            Token::Word(word) => {
                let word = word.to_lowercase();

                if word == "untagged" {
                    Some(TagQuery::Untagged)
                } else {
                    TagPattern::parse(&word).map(TagQuery::Tag)
                }
            }
            Token::Comma | Token::Pipe | Token::RParen => None,
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, maplit::btreeset};

    fn pattern(name: &str) -> TagQuery {
        TagQuery::Tag(TagPattern {
            category: None,
            name: name.to_owned(),
            wildcard: name.contains('*'),
        })
    }

    fn cat_pattern(category: TagCategory, name: &str) -> TagQuery {
        TagQuery::Tag(TagPattern {
            category: Some(category),
            name: name.to_owned(),
            wildcard: name.contains('*'),
        })
    }

    fn and(children: Vec<TagQuery>) -> TagQuery {
        TagQuery::And(children)
    }

    fn or(children: Vec<TagQuery>) -> TagQuery {
        TagQuery::Or(children)
    }

    fn not(child: TagQuery) -> TagQuery {
        TagQuery::Not(Box::new(child))
    }

    fn tag(s: &str) -> Tag {
        s.parse().unwrap()
    }

    #[test]
    fn single_terms() {
        assert_eq!(pattern("sunset"), parse("sunset"));
        assert_eq!(pattern("foo-bar"), parse("foo-bar"));
        assert_eq!(pattern("sunset"), parse("  SUNSET  "));
        assert_eq!(pattern("sunset"), parse("(sunset)"));
        assert_eq!(
            cat_pattern(TagCategory::Artist, "someone"),
            parse("artist:someone")
        );
        assert_eq!(TagQuery::Untagged, parse("untagged"));
        assert_eq!(TagQuery::Untagged, parse("Untagged"));
    }

    #[test]
    fn invalid_category_prefix_is_literal() {
        // "year" is not a category, so the whole token (colon included) is a name.
        assert_eq!(pattern("year:2020"), parse("year:2020"));

        // A valid category with nothing after the colon is also a literal.
        assert_eq!(pattern("artist:"), parse("artist:"));
    }

    #[test]
    fn conjunctions() {
        assert_eq!(and(vec![pattern("foo"), pattern("bar")]), parse("foo, bar"));
        assert_eq!(
            and(vec![pattern("foo"), pattern("bar")]),
            parse("foo and bar")
        );
        assert_eq!(
            and(vec![pattern("foo"), pattern("bar"), pattern("baz")]),
            parse("foo,bar , baz")
        );
    }

    #[test]
    fn disjunctions() {
        assert_eq!(or(vec![pattern("foo"), pattern("bar")]), parse("foo | bar"));
        assert_eq!(or(vec![pattern("foo"), pattern("bar")]), parse("foo or bar"));
        assert_eq!(or(vec![pattern("foo"), pattern("bar")]), parse("(foo | bar)"));

        // Pipe binds tighter than comma.
        assert_eq!(
            and(vec![pattern("a"), or(vec![pattern("b"), pattern("c")])]),
            parse("a, b | c")
        );
    }

    #[test]
    fn negation() {
        assert_eq!(not(pattern("foo")), parse("-foo"));
        assert_eq!(
            and(vec![pattern("foo"), not(pattern("bar"))]),
            parse("foo, -bar")
        );
        assert_eq!(
            not(or(vec![pattern("foo"), pattern("bar")])),
            parse("-(foo | bar)")
        );
        assert_eq!(not(TagQuery::Untagged), parse("-untagged"));
    }

    #[test]
    fn nested_groups() {
        assert_eq!(
            and(vec![
                or(vec![pattern("a"), and(vec![pattern("b"), pattern("c")])]),
                pattern("d")
            ]),
            parse("(a | (b, c)), d")
        );
    }

    #[test]
    fn malformed_input_degrades() {
        // Unparseable or empty input means "match everything".
        assert!(parse("").is_match_all());
        assert!(parse("  ,, |").is_match_all());
        assert!(parse("()").is_match_all());
        assert!(parse("-").is_match_all());

        // A malformed term is discarded; the rest of the query survives.
        assert_eq!(pattern("foo"), parse("foo, ()"));
        assert_eq!(pattern("foo"), parse(", foo"));
        assert_eq!(pattern("foo"), parse(") foo"));

        // An unclosed group is accepted through end of input.
        assert_eq!(or(vec![pattern("foo"), pattern("bar")]), parse("(foo | bar"));
    }

    #[test]
    fn wildcard_flags() {
        match parse("art*") {
            TagQuery::Tag(pattern) => {
                assert!(pattern.wildcard);
                assert_eq!("art*", pattern.name);
            }
            other => panic!("unexpected parse: {other:?}"),
        }

        match parse("artist:art*") {
            TagQuery::Tag(pattern) => {
                assert!(pattern.wildcard);
                assert_eq!(Some(TagCategory::Artist), pattern.category);
                assert_eq!("art*", pattern.name);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn wildcard_matching() {
        let artemis = tag("character:artemis");
        let artwork = tag("artwork");
        let someartist = tag("artist:someartist");

        // Prefix
        let q = parse("art*");
        assert!(q.matches(&btreeset![artemis.clone()]));
        assert!(q.matches(&btreeset![artwork.clone()]));
        assert!(!q.matches(&btreeset![someartist.clone()]));

        // The pattern matches tag names, never categories.
        let q = parse("artist:art*");
        assert!(!q.matches(&btreeset![artemis.clone()]));
        assert!(!q.matches(&btreeset![someartist.clone()]));
        assert!(q.matches(&btreeset![tag("artist:artful")]));

        // Suffix
        let q = parse("*set");
        assert!(q.matches(&btreeset![tag("sunset")]));
        assert!(!q.matches(&btreeset![tag("settler")]));

        // Infix
        let q = parse("s*t");
        assert!(q.matches(&btreeset![tag("sunset")]));
        assert!(q.matches(&btreeset![tag("st")]));
        assert!(!q.matches(&btreeset![tag("sets")]));
    }

    #[test]
    fn category_scoping() {
        let general_red = tag("red");
        let artist_red = tag("artist:red");

        // Unqualified searches all categories.
        let q = parse("red");
        assert!(q.matches(&btreeset![general_red.clone()]));
        assert!(q.matches(&btreeset![artist_red.clone()]));

        // Qualified searches one.
        let q = parse("artist:red");
        assert!(!q.matches(&btreeset![general_red]));
        assert!(q.matches(&btreeset![artist_red]));
    }

    #[test]
    fn untagged_semantics() {
        let q = parse("untagged");
        assert!(q.matches(&btreeset![]));
        assert!(!q.matches(&btreeset![tag("red")]));

        // Combined with a positive predicate, the conjunction is unsatisfiable.
        let q = parse("untagged, red");
        assert!(!q.matches(&btreeset![]));
        assert!(!q.matches(&btreeset![tag("red")]));

        // Negated, it means "has at least one tag".
        let q = parse("-untagged");
        assert!(!q.matches(&btreeset![]));
        assert!(q.matches(&btreeset![tag("red")]));
    }

    #[test]
    fn boolean_evaluation() {
        let q = parse("red, -(artist:red | blue)");

        assert!(q.matches(&btreeset![tag("red")]));
        assert!(!q.matches(&btreeset![tag("red"), tag("blue")]));
        assert!(!q.matches(&btreeset![tag("red"), tag("artist:red")]));
        assert!(q.matches(&btreeset![tag("red"), tag("green")]));
    }

    #[test]
    fn tag_round_trip() {
        for s in ["sunset", "artist:someone", "metadata:favorite"] {
            assert_eq!(s, tag(s).to_string());
        }

        // Invalid category prefixes round-trip as general literals.
        assert_eq!("year:2020", tag("year:2020").to_string());
    }

    #[test]
    fn comma_names_rejected() {
        assert!("a,b".parse::<Tag>().is_err());
        assert!("artist:a,b".parse::<Tag>().is_err());

        // An invalid category prefix falls back to a general literal, which is still comma-checked.
        assert!("nocategory:a,b".parse::<Tag>().is_err());
    }

    #[test]
    fn tag_list_parsing() {
        assert_eq!(
            btreeset![tag("red"), tag("artist:someone")],
            parse_tag_list(" red , artist:someone ,, ")
        );
        assert!(parse_tag_list("  ,  ").is_empty());
    }
}
