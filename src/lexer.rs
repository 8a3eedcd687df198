//! 查询语言的词法分析器
//!
//! 在游标处按固定优先级依次尝试每个 token 模式，第一个匹配的模式胜出。
//! 顺序很重要：通用的 `[属性]` 模式必须排在 `[Diagnostic > X]`、`[IP]`
//! 等更具体的方括号模式之后。

use std::net::Ipv6Addr;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::error::ParseError;
use crate::token::{Span, Token, TokenKind};

/// 方括号键的匹配片段，允许 `\\`、`\>`、`\]` 转义
const KEY: &str = r"[^\]\\]*(?:\\.[^\]\\]*)*";
const KEY_LAZY: &str = r"[^\]\\]*?(?:\\.[^\]\\]*)*?";
const IPV4: &str = r"(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";
/// 点分 IPv4 结尾的写法排在前面，否则 `::ffff:10.0.0.1` 会在 `::ffff:10` 处截断
const IPV6_CANDIDATE: &str = r"(?:[0-9A-Fa-f]{0,4}(?::[0-9A-Fa-f]{0,4}){1,6}:(?:[0-9]{1,3}\.){3}[0-9]{1,3}|[0-9A-Fa-f]{0,4}(?::[0-9A-Fa-f]{0,4}){1,7})";
const MAC: &str = r"[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}\.[0-9a-fA-F]{4}";

/// 二次校验：正则只负责圈出候选文本
type Validator = fn(&Captures) -> bool;

struct Pattern {
    kind: TokenKind,
    regex: Regex,
    validate: Option<Validator>,
}

fn keyword(kind: TokenKind, word: &str) -> (TokenKind, String, Option<Validator>) {
    (kind, format!(r"(?i)^(?:{word})\b"), None)
}

fn item(kind: TokenKind, name: &str) -> (TokenKind, String, Option<Validator>) {
    (kind, format!(r"(?i)^\[(?:{name})\]"), None)
}

fn valid_ipv6(caps: &Captures) -> bool {
    caps.name("addr")
        .map(|m| m.as_str().parse::<Ipv6Addr>().is_ok())
        .unwrap_or(false)
}

static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    let table = vec![
        keyword(TokenKind::And, "and"),
        keyword(TokenKind::Or, "or"),
        keyword(TokenKind::Not, "not"),
        keyword(TokenKind::Is, "is"),
        keyword(TokenKind::In, "in"),
        (TokenKind::BracketIn, r"^\(".to_string(), None),
        (TokenKind::BracketOut, r"^\)".to_string(), None),
        keyword(TokenKind::Contains, "contains"),
        keyword(TokenKind::ContainsNoCase, "containsnocase"),
        keyword(TokenKind::Matches, "matches"),
        keyword(TokenKind::StartsWith, "startswith"),
        keyword(TokenKind::EndsWith, "endswith"),
        keyword(TokenKind::Before, "before"),
        keyword(TokenKind::After, "after"),
        keyword(TokenKind::LessThan, "lessthan"),
        keyword(TokenKind::GreaterThan, "greaterthan"),
        keyword(TokenKind::True, "true"),
        keyword(TokenKind::False, "false"),
        item(TokenKind::Ip, "ip"),
        item(TokenKind::Mac, "mac"),
        item(TokenKind::Module, "module"),
        item(TokenKind::Interface, "interface"),
        item(TokenKind::Vrf, "vrf"),
        item(TokenKind::VirtualName, "virtual name"),
        item(TokenKind::Id, "id|device"),
        item(TokenKind::Domain, "domain"),
        item(TokenKind::Type, "type"),
        item(TokenKind::Driver, "driver"),
        (
            TokenKind::Diagnostic,
            format!(r"(?i)^\[diagnostic\s*>\s*(?P<k2>{KEY})\]"),
            None,
        ),
        (
            TokenKind::Rule,
            format!(r"(?i)^\[rule\s*>\s*(?P<k1>{KEY_LAZY})\s*>\s*(?P<k2>{KEY_LAZY})\]"),
            None,
        ),
        (
            TokenKind::DriverAttr,
            format!(r"^\[(?P<k1>{KEY_LAZY})\s*>\s*(?P<k2>{KEY_LAZY})\]"),
            None,
        ),
        (TokenKind::GenericAttr, format!(r"^\[(?P<k2>{KEY_LAZY})\]"), None),
        (
            TokenKind::SubnetV4,
            format!(r"^(?P<val>{IPV4}/(?:1[0-9]|2[0-9]|3[0-2]|[0-9]))"),
            None,
        ),
        (TokenKind::Ipv4, format!(r"^(?P<val>{IPV4})"), None),
        (
            TokenKind::SubnetV6,
            format!(r"^(?P<val>(?P<addr>{IPV6_CANDIDATE})/(?:1[01][0-9]|12[0-8]|[0-9][0-9]|[0-9]))"),
            Some(valid_ipv6 as Validator),
        ),
        (
            TokenKind::Ipv6,
            format!(r"^(?P<val>(?P<addr>{IPV6_CANDIDATE}))"),
            Some(valid_ipv6 as Validator),
        ),
        (
            TokenKind::MacSubnet,
            format!(r"^(?P<val>{MAC}/(?:4[0-8]|[1-3][0-9]|[0-9]))"),
            None,
        ),
        (TokenKind::MacAddress, format!(r"^(?P<val>{MAC})"), None),
        (TokenKind::QuotedText, r#"^"(?P<val>(?:[^"\\]|\\.)*)""#.to_string(), None),
        (TokenKind::NumericValue, r"^(?P<val>[0-9.,]+)\b".to_string(), None),
        (TokenKind::EnumWord, r"^(?P<val>[A-Z0-9_]+)".to_string(), None),
    ];
    table
        .into_iter()
        .filter_map(|(kind, pattern, validate)| match Regex::new(&pattern) {
            Ok(regex) => Some(Pattern { kind, regex, validate }),
            Err(e) => {
                tracing::error!("invalid token pattern for {:?}: {}", kind, e);
                None
            }
        })
        .collect()
});

/// 转义方括号键中的 `\`、`>`、`]`
pub fn escape_key(key: &str) -> String {
    escape(key, &['\\', '>', ']'])
}

/// [`escape_key`] 的逆操作
pub fn unescape_key(key: &str) -> String {
    unescape(key, &['\\', '>', ']'])
}

/// 转义引号文本中的 `\` 和 `"`
pub fn escape_value(value: &str) -> String {
    escape(value, &['\\', '"'])
}

/// [`escape_value`] 的逆操作
pub fn unescape_value(value: &str) -> String {
    unescape(value, &['\\', '"'])
}

fn escape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// 单遍扫描，只还原已知的转义序列，其余反斜杠原样保留
fn unescape(text: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(&next) = chars.peek() {
                if special.contains(&next) {
                    out.push(next);
                    chars.next();
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

pub struct Lexer<'a> {
    /// 已去除首尾空白的输入
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    offset: usize,
    /// 当前位置之前的字符数
    chars_before: usize,
    failed: bool,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input: input.trim(), offset: 0, chars_before: 0, failed: false }
    }

    /// 推进一段字节，同时维护字符计数
    fn advance(&mut self, len: usize) {
        let consumed = &self.input[self.offset..self.offset + len];
        self.chars_before += consumed.chars().count();
        self.offset += len;
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        let rest = &self.input[self.offset..];
        let trimmed = rest.trim_start();
        self.advance(rest.len() - trimmed.len());
    }

    fn read_token(&mut self) -> Result<Token, ParseError> {
        let rest = &self.input[self.offset..];
        let position = self.chars_before + 1;
        for pattern in PATTERNS.iter() {
            let Some(caps) = pattern.regex.captures(rest) else {
                continue;
            };
            if let Some(validate) = pattern.validate {
                if !validate(&caps) {
                    continue;
                }
            }
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let len = whole.end();
            if len == 0 {
                continue;
            }
            let mut token = Token::new(
                pattern.kind,
                position,
                Span::new(self.offset, self.offset + len),
            );
            token.key1 = caps.name("k1").map(|m| unescape_key(m.as_str()));
            token.key2 = caps.name("k2").map(|m| unescape_key(m.as_str()));
            token.value = caps.name("val").map(|m| unescape_value(m.as_str()));
            self.advance(len);
            return Ok(token);
        }
        Err(ParseError::unknown_token(position))
    }
}

impl Iterator for Lexer<'_> {
    type Item = Result<Token, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        self.skip_whitespace();
        if self.offset >= self.input.len() {
            return None; // 到达输入末尾
        }
        let token = self.read_token();
        if token.is_err() {
            self.failed = true;
        }
        Some(token)
    }
}

/// 将查询文本切分为 token 序列
pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    Lexer::new(text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_simple_query() {
        let tokens = tokenize(r#"[Name] IS "core-01""#).unwrap();
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[0].kind, TokenKind::GenericAttr);
        assert_eq!(tokens[0].key2.as_deref(), Some("Name"));
        assert_eq!(tokens[1].kind, TokenKind::Is);
        assert_eq!(tokens[2].kind, TokenKind::QuotedText);
        assert_eq!(tokens[2].value.as_deref(), Some("core-01"));
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        assert_eq!(
            kinds("and Or NOT is In contains CONTAINSNOCASE matches startswith endswith"),
            vec![
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Not,
                TokenKind::Is,
                TokenKind::In,
                TokenKind::Contains,
                TokenKind::ContainsNoCase,
                TokenKind::Matches,
                TokenKind::StartsWith,
                TokenKind::EndsWith,
            ]
        );
        assert_eq!(
            kinds("before after lessthan greaterthan true FALSE ( )"),
            vec![
                TokenKind::Before,
                TokenKind::After,
                TokenKind::LessThan,
                TokenKind::GreaterThan,
                TokenKind::True,
                TokenKind::False,
                TokenKind::BracketIn,
                TokenKind::BracketOut,
            ]
        );
    }

    #[test]
    fn test_keyword_needs_word_boundary() {
        // "ISS" 不是关键字，只能作为枚举单词
        assert_eq!(kinds("ISS"), vec![TokenKind::EnumWord]);
        assert!(tokenize("contain").is_err());
    }

    #[test]
    fn test_bracketed_items() {
        assert_eq!(
            kinds("[IP] [mac] [Module] [INTERFACE] [VRF] [Virtual Name] [ID] [Device] [Domain] [Type] [Driver]"),
            vec![
                TokenKind::Ip,
                TokenKind::Mac,
                TokenKind::Module,
                TokenKind::Interface,
                TokenKind::Vrf,
                TokenKind::VirtualName,
                TokenKind::Id,
                TokenKind::Id,
                TokenKind::Domain,
                TokenKind::Type,
                TokenKind::Driver,
            ]
        );
    }

    #[test]
    fn test_keyed_items() {
        let tokens = tokenize("[Diagnostic > CPU Load] [Rule > Security > No Telnet] [Cisco IOS > Main Memory] [Software Version]").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Diagnostic);
        assert_eq!(tokens[0].key2.as_deref(), Some("CPU Load"));
        assert_eq!(tokens[1].kind, TokenKind::Rule);
        assert_eq!(tokens[1].key1.as_deref(), Some("Security"));
        assert_eq!(tokens[1].key2.as_deref(), Some("No Telnet"));
        assert_eq!(tokens[2].kind, TokenKind::DriverAttr);
        assert_eq!(tokens[2].key1.as_deref(), Some("Cisco IOS"));
        assert_eq!(tokens[2].key2.as_deref(), Some("Main Memory"));
        assert_eq!(tokens[3].kind, TokenKind::GenericAttr);
        assert_eq!(tokens[3].key2.as_deref(), Some("Software Version"));
    }

    #[test]
    fn test_escaped_keys() {
        let tokens = tokenize(r"[A\>B>C\]D\\]").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::DriverAttr);
        assert_eq!(tokens[0].key1.as_deref(), Some("A>B"));
        assert_eq!(tokens[0].key2.as_deref(), Some(r"C]D\"));
    }

    #[test]
    fn test_escaped_quoted_text() {
        let tokens = tokenize(r#""say \"hi\" \\ bye""#).unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].value.as_deref(), Some(r#"say "hi" \ bye"#));
    }

    #[test]
    fn test_address_literals() {
        assert_eq!(
            kinds("10.0.0.0/24 10.0.0.1 2001:db8::/32 2001:db8::1 0011.2233.4455/24 0011.2233.4455"),
            vec![
                TokenKind::SubnetV4,
                TokenKind::Ipv4,
                TokenKind::SubnetV6,
                TokenKind::Ipv6,
                TokenKind::MacSubnet,
                TokenKind::MacAddress,
            ]
        );
        let tokens = tokenize("fe80::1/64").unwrap();
        assert_eq!(tokens[0].value.as_deref(), Some("fe80::1/64"));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_one_token() {
        for text in ["::ffff:10.0.0.1", "::ffff:a00:1", "64:ff9b::192.0.2.33"] {
            let tokens = tokenize(text).unwrap();
            assert_eq!(tokens.len(), 1, "{text}");
            assert_eq!(tokens[0].kind, TokenKind::Ipv6);
            assert_eq!(tokens[0].value.as_deref(), Some(text));
        }
        let tokens = tokenize("::ffff:10.0.0.0/104 and").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::SubnetV6);
        assert_eq!(tokens[0].value.as_deref(), Some("::ffff:10.0.0.0/104"));
        assert_eq!(tokens[1].kind, TokenKind::And);
    }

    #[test]
    fn test_numbers_and_enum_words() {
        let tokens = tokenize("42 3.5 INPRODUCTION").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::NumericValue);
        assert_eq!(tokens[0].value.as_deref(), Some("42"));
        assert_eq!(tokens[1].kind, TokenKind::NumericValue);
        assert_eq!(tokens[2].kind, TokenKind::EnumWord);
        assert_eq!(tokens[2].value.as_deref(), Some("INPRODUCTION"));
    }

    #[test]
    fn test_positions_skip_whitespace() {
        let tokens = tokenize(r#"   [Name]   is  "x"  "#).unwrap();
        let positions: Vec<_> = tokens.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![1, 10, 14]);
    }

    #[test]
    fn test_unknown_token_position() {
        let err = tokenize(r#"[Name] is "x" $oops"#).unwrap_err();
        assert_eq!(err.position, Some(15));
        assert!(err.message.contains("unknown token"));
    }

    #[test]
    fn test_unterminated_quote_is_unknown() {
        let err = tokenize(r#"[Name] is "abc"#).unwrap_err();
        assert_eq!(err.position, Some(11));
    }

    #[test]
    fn test_empty_input() {
        assert!(tokenize("").unwrap().is_empty());
        assert!(tokenize("   \t ").unwrap().is_empty());
    }

    #[test]
    fn test_escape_round_trip() {
        let samples = [
            "",
            "plain",
            r"back\slash",
            r"trailing\",
            "a > b ] c",
            r#"quote " and \" mixed"#,
            r"\\\>\]",
            "unicode é > ü",
        ];
        for s in samples {
            assert_eq!(unescape_key(&escape_key(s)), s);
            assert_eq!(unescape_value(&escape_value(s)), s);
        }
    }

    /// 由特殊字符组成的全部短字符串
    fn special_strings(max_len: usize) -> Vec<String> {
        let alphabet = ['a', '\\', '"', ']', '>'];
        let mut all = vec![String::new()];
        let mut previous = vec![String::new()];
        for _ in 0..max_len {
            let next: Vec<String> = previous
                .iter()
                .flat_map(|s| alphabet.iter().map(move |c| format!("{s}{c}")))
                .collect();
            all.extend(next.iter().cloned());
            previous = next;
        }
        all
    }

    #[test]
    fn test_escape_round_trip_exhaustive() {
        for s in special_strings(4) {
            assert_eq!(unescape_key(&escape_key(&s)), s, "key {s:?}");
            assert_eq!(unescape_value(&escape_value(&s)), s, "value {s:?}");

            let quoted = format!("\"{}\"", escape_value(&s));
            let tokens = tokenize(&quoted).unwrap();
            assert_eq!(tokens.len(), 1, "{quoted}");
            assert_eq!(tokens[0].kind, TokenKind::QuotedText);
            assert_eq!(tokens[0].value.as_deref(), Some(s.as_str()));

            if !s.is_empty() {
                let bracketed = format!("[{}]", escape_key(&s));
                let tokens = tokenize(&bracketed).unwrap();
                assert_eq!(tokens.len(), 1, "{bracketed}");
                assert_eq!(tokens[0].kind, TokenKind::GenericAttr);
                assert_eq!(tokens[0].key2.as_deref(), Some(s.as_str()));
            }
        }
    }

    #[test]
    fn test_lexer_stops_after_error() {
        let mut lexer = Lexer::new("[Name] $ is");
        assert!(lexer.next().unwrap().is_ok());
        assert!(lexer.next().unwrap().is_err());
        assert!(lexer.next().is_none());
    }
}
