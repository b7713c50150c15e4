//! 从模型回复中抽取唯一一条 SQL 语句
//!
//! 语句边界由一个轻量扫描器决定：单引号字符串、双引号/方括号/反引号标识符、`--` 与 `/* */` 注释、括号深度。
//! 顶层 `;` 结束语句，其后若还有语句开头即为多语句错误。
//! 没有 `;` 时，遇到说明文字行或新语句开头即停止；说明文字的识别只作为兜底。

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SqlExtractError {
    #[error("no SQL statement found in model output")]
    NoStatement,

    #[error("model output contains multiple SQL statements")]
    MultipleStatements,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Keyword {
    Select,
    With,
    Insert,
    Update,
    Delete,
}

impl Keyword {
    const ALL: [(&'static str, Keyword); 5] = [
        ("SELECT", Keyword::Select),
        ("WITH", Keyword::With),
        ("INSERT", Keyword::Insert),
        ("UPDATE", Keyword::Update),
        ("DELETE", Keyword::Delete),
    ];

    fn word(self) -> &'static str {
        Self::ALL
            .iter()
            .find(|(_, kw)| *kw == self)
            .map(|(word, _)| *word)
            .unwrap_or("")
    }
}

/// 行首的语句关键字（大小写不敏感，需是完整单词）
fn leading_keyword(line: &str) -> Option<Keyword> {
    let trimmed = line.trim_start();
    Keyword::ALL.iter().find_map(|(word, kw)| {
        let head = trimmed.get(..word.len())?;
        if !head.eq_ignore_ascii_case(word) {
            return None;
        }
        match trimmed[word.len()..].chars().next() {
            None => Some(*kw),
            Some(c) if c.is_alphanumeric() || c == '_' => None,
            Some(_) => Some(*kw),
        }
    })
}

/// 行首关键字以大写书写（模型输出 SQL 的惯常写法）
fn keyword_written_upper(line: &str) -> bool {
    let trimmed = line.trim_start();
    leading_keyword(trimmed).is_some_and(|kw| {
        trimmed[..kw.word().len()]
            .chars()
            .all(|c| c.is_ascii_uppercase())
    })
}

/// 行内是否带有 SQL 结构：运算符、括号或大写子句关键字
fn has_sql_structure(line: &str) -> bool {
    line.contains(['(', ')', '=', '*', ';', '<', '>'])
        || line.split_whitespace().any(|word| {
            ["FROM", "WHERE", "JOIN", "INTO", "SET", "VALUES", "GROUP", "ORDER", "LIMIT", "AS"]
                .contains(&word)
        })
}

/// 以关键字开头的引导语，如 "Select the artists like this:"
fn is_prose_lead(lines: &[&str], index: usize) -> bool {
    let line = lines[index].trim();
    if line.ends_with(':') {
        return true;
    }
    if keyword_written_upper(line) || has_sql_structure(line) || ends_with_continuation(line) {
        return false;
    }
    lines[index + 1..]
        .iter()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .is_some_and(keyword_written_upper)
}

static PROSE_MARKER: OnceLock<Regex> = OnceLock::new();

/// 模型在 SQL 之后常追加的说明文字
fn is_prose_marker(line: &str) -> bool {
    let re = PROSE_MARKER.get_or_init(|| {
        Regex::new(
            r"(?i)^(here is|here's|this query|this sql|the query|the above|explanation|note:|notes:|first part|second part|part \d|step \d|\d+[.)]\s+[a-z]|[-•]\s+[a-z])",
        )
        .unwrap()
    });
    re.is_match(line.trim())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScanState {
    #[default]
    Code,
    SingleQuote,
    DoubleQuote,
    Bracket,
    Backtick,
    BlockComment,
}

/// 逐行喂入的词法扫描器，状态跨行保留（多行字符串、块注释）
#[derive(Debug, Default)]
struct Scanner {
    state: ScanState,
    depth: i32,
    /// 自上次重置以来是否读到过注释以外的代码
    code_seen: bool,
}

impl Scanner {
    fn at_top_level(&self) -> bool {
        self.state == ScanState::Code && self.depth <= 0
    }

    /// 返回本行中顶层 `;` 的字节位置
    fn feed(&mut self, line: &str) -> Option<usize> {
        let mut chars = line.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            match self.state {
                ScanState::Code => {
                    match c {
                        '-' if matches!(chars.peek(), Some((_, '-'))) => return None,
                        '/' if matches!(chars.peek(), Some((_, '*'))) => {
                            chars.next();
                            self.state = ScanState::BlockComment;
                            continue;
                        }
                        ';' if self.depth <= 0 => return Some(i),
                        _ => {}
                    }
                    if !c.is_whitespace() {
                        self.code_seen = true;
                    }
                    match c {
                        '\'' => self.state = ScanState::SingleQuote,
                        '"' => self.state = ScanState::DoubleQuote,
                        '[' => self.state = ScanState::Bracket,
                        '`' => self.state = ScanState::Backtick,
                        '(' => self.depth += 1,
                        ')' => self.depth -= 1,
                        _ => {}
                    }
                }
                // '' 转义在下一个字符处重新进入字符串，效果等同
                ScanState::SingleQuote if c == '\'' => self.state = ScanState::Code,
                ScanState::DoubleQuote if c == '"' => self.state = ScanState::Code,
                ScanState::Bracket if c == ']' => self.state = ScanState::Code,
                ScanState::Backtick if c == '`' => self.state = ScanState::Code,
                ScanState::BlockComment if c == '*' && matches!(chars.peek(), Some((_, '/'))) => {
                    chars.next();
                    self.state = ScanState::Code;
                }
                _ => {}
            }
        }
        None
    }
}

/// 上一行以这些结尾时，下一行的关键字属于同一语句
fn ends_with_continuation(line: &str) -> bool {
    let trimmed = line.trim_end();
    if trimmed.ends_with(['(', ',', '=']) {
        return true;
    }
    let last_word = trimmed
        .rsplit(|c: char| c.is_whitespace() || c == ')')
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    ["UNION", "ALL", "INTERSECT", "EXCEPT", "AS", "IN", "AND", "OR", "ON"].contains(&last_word.as_str())
}

/// 判断当前行开头的关键字是否开启了第二条语句
fn starts_new_statement(kind: Keyword, next: Keyword, body_seen: bool, prev_line: &str) -> bool {
    if ends_with_continuation(prev_line) {
        return false;
    }
    match (kind, next) {
        // WITH 的主体语句
        (Keyword::With, Keyword::Select | Keyword::Insert | Keyword::Update | Keyword::Delete) => {
            body_seen
        }
        // INSERT ... SELECT / INSERT ... WITH
        (Keyword::Insert, Keyword::Select | Keyword::With) => body_seen,
        _ => true,
    }
}

fn strip_markup(raw: &str) -> String {
    raw.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .map(|line| line.replace('`', ""))
        .collect::<Vec<_>>()
        .join("\n")
}

/// 顶层 `;` 之后的剩余文本里是否还有一条语句
///
/// 任何以顶层 `;` 结束的非注释代码都算一条（说明文字开头的除外）；
/// 没有结束符时只认大写书写的语句关键字。
fn remainder_has_statement(remainder: &str) -> bool {
    let mut scanner = Scanner::default();
    let mut segment = String::new();
    for line in remainder.lines() {
        let mut rest = line;
        while let Some(pos) = scanner.feed(rest) {
            segment.push_str(&rest[..pos]);
            if scanner.code_seen && !is_prose_marker(&segment) {
                return true;
            }
            scanner.code_seen = false;
            segment.clear();
            rest = &rest[pos + 1..];
        }
        if scanner.code_seen {
            segment.push_str(rest);
            segment.push('\n');
        } else {
            segment.clear();
        }
    }
    remainder.lines().any(keyword_written_upper)
}

/// 抽取唯一一条以 `;` 结尾的 SQL 语句
pub fn clean_sql(raw: &str) -> Result<String, SqlExtractError> {
    let text = strip_markup(raw);
    let lines: Vec<&str> = text.lines().collect();
    let start = (0..lines.len())
        .find(|&i| leading_keyword(lines[i]).is_some() && !is_prose_lead(&lines, i))
        .ok_or(SqlExtractError::NoStatement)?;
    let kind = leading_keyword(lines[start]).ok_or(SqlExtractError::NoStatement)?;

    let mut scanner = Scanner::default();
    let mut statement: Vec<&str> = Vec::new();
    let mut body_seen = false;
    let mut prev_line: &str = "";

    for (offset, &line) in lines[start..].iter().enumerate() {
        let trimmed = line.trim();
        if offset > 0 && scanner.at_top_level() {
            if trimmed.is_empty() {
                statement.push(line);
                continue;
            }
            if is_prose_marker(trimmed) {
                break;
            }
            if let Some(next) = leading_keyword(trimmed) {
                if starts_new_statement(kind, next, body_seen, prev_line) {
                    return Err(SqlExtractError::MultipleStatements);
                }
                if matches!(kind, Keyword::With | Keyword::Insert) {
                    body_seen = true;
                }
            }
        }

        if let Some(pos) = scanner.feed(line) {
            statement.push(&line[..=pos]);
            let rest_of_line = &line[pos + 1..];
            let following = lines[start + offset + 1..].join("\n");
            let remainder = format!("{}\n{}", rest_of_line, following);
            if remainder_has_statement(&remainder) {
                return Err(SqlExtractError::MultipleStatements);
            }
            break;
        }
        statement.push(line);
        if !trimmed.is_empty() {
            prev_line = line;
        }
    }

    let mut sql = statement.join("\n").trim().to_string();
    if sql.is_empty() {
        return Err(SqlExtractError::NoStatement);
    }
    if !sql.ends_with(';') {
        sql.push(';');
    }
    Ok(sql)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_statement_gets_terminator() {
        assert_eq!(clean_sql("SELECT * FROM Artist").unwrap(), "SELECT * FROM Artist;");
    }

    #[test]
    fn test_fenced_with_filler() {
        let raw = "Here is the query you asked for:\n```sql\nSELECT Name\nFROM Artist\nORDER BY Name;\n```\nThis lists every artist.";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT Name\nFROM Artist\nORDER BY Name;");
    }

    #[test]
    fn test_two_statements_on_one_line() {
        assert_eq!(
            clean_sql("SELECT 1; SELECT 2;"),
            Err(SqlExtractError::MultipleStatements)
        );
    }

    #[test]
    fn test_two_statements_on_separate_lines() {
        let raw = "SELECT Name FROM Artist;\n\nSELECT Title FROM Album;";
        assert_eq!(clean_sql(raw), Err(SqlExtractError::MultipleStatements));
    }

    #[test]
    fn test_two_statements_without_semicolons() {
        let raw = "SELECT Name FROM Artist\n\nSELECT Title FROM Album";
        assert_eq!(clean_sql(raw), Err(SqlExtractError::MultipleStatements));
    }

    #[test]
    fn test_semicolon_inside_string_literal() {
        let raw = "SELECT * FROM Track WHERE Name = 'a;b' AND Composer = 'it''s';";
        assert_eq!(clean_sql(raw).unwrap(), raw);
    }

    #[test]
    fn test_semicolon_inside_comment() {
        let raw = "SELECT Name -- pick; the name\nFROM Artist /* ; */ LIMIT 5;";
        assert_eq!(clean_sql(raw).unwrap(), raw);
    }

    #[test]
    fn test_union_and_cte_are_one_statement() {
        let raw = "SELECT Name FROM Artist\nUNION ALL\nSELECT Title FROM Album;";
        assert_eq!(clean_sql(raw).unwrap(), raw);

        let cte = "WITH sales AS (\n  SELECT CustomerId, SUM(Total) AS t FROM Invoice GROUP BY CustomerId\n)\nSELECT * FROM sales ORDER BY t DESC LIMIT 5;";
        assert_eq!(clean_sql(cte).unwrap(), cte);
    }

    #[test]
    fn test_subquery_on_own_line() {
        let raw = "SELECT Name FROM Artist WHERE ArtistId IN (\nSELECT ArtistId FROM Album\n)";
        assert_eq!(clean_sql(raw).unwrap(), format!("{};", raw));
    }

    #[test]
    fn test_explanation_after_unterminated_statement() {
        let raw = "SELECT COUNT(*) FROM Track\n\nExplanation: counts all tracks.";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT COUNT(*) FROM Track;");

        let listed = "SELECT Name FROM Genre\n1. The query selects every genre";
        assert_eq!(clean_sql(listed).unwrap(), "SELECT Name FROM Genre;");
    }

    #[test]
    fn test_trailing_prose_after_terminator_is_ignored() {
        let raw = "SELECT Name FROM Artist;\nSelect statements like this return rows.";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT Name FROM Artist;");
    }

    #[test]
    fn test_keyword_lead_in_is_skipped() {
        let raw = "With the tables above, this is the query:\nSELECT Name FROM Artist;";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT Name FROM Artist;");

        let raw = "Select the artists like this:\nSELECT Name FROM Artist;";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT Name FROM Artist;");

        let raw = "Select every artist name\n\nSELECT Name FROM Artist ORDER BY Name";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT Name FROM Artist ORDER BY Name;");
    }

    #[test]
    fn test_lowercase_sql_is_not_a_lead_in() {
        let raw = "select name from artist where name like 'A%'";
        assert_eq!(clean_sql(raw).unwrap(), format!("{};", raw));

        let cte = "with x as (\nSELECT 1 AS n\n)\nSELECT n FROM x;";
        assert_eq!(clean_sql(cte).unwrap(), cte);
    }

    #[test]
    fn test_any_terminated_second_statement_is_rejected() {
        for raw in [
            "SELECT Name FROM Artist;\nDROP TABLE Album;",
            "SELECT Name FROM Artist; pragma table_info(Album);",
            "SELECT Name FROM Artist;\n/* cleanup */\nvacuum;",
        ] {
            assert_eq!(clean_sql(raw), Err(SqlExtractError::MultipleStatements), "{}", raw);
        }

        let raw = "SELECT Name FROM Artist; -- done\nNote: names are unique; order is arbitrary.";
        assert_eq!(clean_sql(raw).unwrap(), "SELECT Name FROM Artist;");
    }

    #[test]
    fn test_no_statement() {
        assert_eq!(
            clean_sql("I am not able to answer."),
            Err(SqlExtractError::NoStatement)
        );
        assert_eq!(clean_sql("Selection sort is O(n^2)"), Err(SqlExtractError::NoStatement));
    }

    #[test]
    fn test_output_has_at_most_one_terminator() {
        for raw in [
            "SELECT 1",
            "```\nselect a from t where b = ';'\n```",
            "WITH x AS (SELECT 1) SELECT * FROM x;",
        ] {
            let sql = clean_sql(raw).unwrap();
            assert!(sql.ends_with(';'));
            let mut scanner = Scanner::default();
            let first = scanner.feed(&sql).unwrap();
            assert_eq!(first, sql.len() - 1, "{}", sql);
        }
    }
}
