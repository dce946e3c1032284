//! JSONPath template dialect.
//!
//! A template is literal text mixed with `{...}` actions, in the style of
//! kubectl's `-o jsonpath`. Each action holds a path:
//!
//! | Syntax                  | Meaning                               |
//! |-------------------------|---------------------------------------|
//! | `.name` / `['name']`    | object member                         |
//! | `['a','b']`             | several members                       |
//! | `.*` / `[*]`            | every member or element               |
//! | `..name`                | recursive descent                     |
//! | `[0]` / `[-1]` / `[0,2]`| array index (negative from the end)   |
//! | `[1:3]` / `[::2]`       | array slice                           |
//! | `[?(@.x == "y")]`       | filter, with `&&`, `||`, `!` and `()` |
//!
//! Filter comparisons are `==`, `!=`, `<`, `<=`, `>`, `>=`. A bare `@.x` tests
//! for existence.

use std::cmp::Ordering;

use serde_json::Value;

use super::ExprError;
use crate::sanitize::NULL_SENTINEL;

/// A parsed template: literal text interleaved with path actions.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPathTemplate {
    segments: Vec<Segment>,
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Path(JsonPath),
}

/// A single path expression (the inside of one `{...}` action).
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    source: String,
    steps: Vec<Step>,
}

#[derive(Debug, Clone, PartialEq)]
enum Step {
    Field(String),
    Fields(Vec<String>),
    Wildcard,
    Recursive(Option<String>),
    Index(Vec<i64>),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: i64,
    },
    Filter(Filter),
}

#[derive(Debug, Clone, PartialEq)]
enum Filter {
    Exists(Vec<Step>),
    Compare {
        left: Operand,
        op: CmpOp,
        right: Operand,
    },
    Not(Box<Filter>),
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Vec<Step>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl JsonPathTemplate {
    /// Parse a template string.
    pub fn parse(expr: &str) -> Result<Self, ExprError> {
        let chars: Vec<char> = expr.chars().collect();
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] != '{' {
                text.push(chars[i]);
                i += 1;
                continue;
            }

            let close = find_action_end(&chars, i + 1)
                .ok_or_else(|| parse_error(expr, "unclosed action, missing '}'"))?;
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }

            let inner: String = chars[i + 1..close].iter().collect();
            segments.push(Segment::Path(JsonPath::parse(inner.trim(), expr)?));
            i = close + 1;
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self { segments })
    }

    /// Render the template, substituting each action with its last match.
    ///
    /// An action without any match is a [`ExprError::NotFound`].
    pub fn render_text(&self, root: &Value) -> Result<String, ExprError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Path(path) => {
                    let matches = path.select(root)?;
                    let last = matches
                        .last()
                        .ok_or_else(|| ExprError::NotFound(path.source.clone()))?;
                    out.push_str(&value_to_text(last));
                }
            }
        }
        Ok(out)
    }

    /// Collect every match of every action, in document order.
    pub fn collect<'v>(&self, root: &'v Value) -> Result<Vec<&'v Value>, ExprError> {
        let mut out = Vec::new();
        for segment in &self.segments {
            if let Segment::Path(path) = segment {
                out.extend(path.select(root)?);
            }
        }
        Ok(out)
    }

    /// Render all matches as a JSON array.
    pub fn render_json(&self, root: &Value) -> Result<String, ExprError> {
        let matches: Vec<&Value> = self.collect(root)?;
        serde_json::to_string(&matches).map_err(|e| ExprError::Eval {
            expr: self.to_string(),
            reason: e.to_string(),
        })
    }
}

impl std::fmt::Display for JsonPathTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => f.write_str(text)?,
                Segment::Path(path) => write!(f, "{{{}}}", path.source)?,
            }
        }
        Ok(())
    }
}

/// Textual form of a matched value.
///
/// Strings are emitted without quotes and `null` becomes [`NULL_SENTINEL`].
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => NULL_SENTINEL.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

fn parse_error(expr: &str, reason: impl Into<String>) -> ExprError {
    ExprError::Parse {
        expr: expr.to_string(),
        reason: reason.into(),
    }
}

/// Find the `}` closing an action, skipping quoted strings.
fn find_action_end(chars: &[char], from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut i = from;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(_) if c == '\\' => i += 1,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == '}' => return Some(i),
            None => {}
        }
        i += 1;
    }
    None
}

impl JsonPath {
    fn parse(source: &str, template: &str) -> Result<Self, ExprError> {
        if source.is_empty() {
            return Err(parse_error(template, "empty action"));
        }
        let mut parser = PathParser {
            chars: source.chars().collect(),
            pos: 0,
            template,
        };
        let steps = parser.parse_steps(false)?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(parser.error(format!(
                "unexpected character {:?}",
                parser.chars[parser.pos]
            )));
        }
        Ok(Self {
            source: source.to_string(),
            steps,
        })
    }

    /// Evaluate the path against a document and return every match.
    pub fn select<'v>(&self, root: &'v Value) -> Result<Vec<&'v Value>, ExprError> {
        select(&self.steps, root)
    }
}

fn select<'v>(steps: &[Step], root: &'v Value) -> Result<Vec<&'v Value>, ExprError> {
    let mut current = vec![root];
    for step in steps {
        current = apply_step(step, current)?;
    }
    Ok(current)
}

fn apply_step<'v>(step: &Step, input: Vec<&'v Value>) -> Result<Vec<&'v Value>, ExprError> {
    let mut out = Vec::new();
    match step {
        Step::Field(name) => {
            for value in input {
                if let Some(child) = value.as_object().and_then(|m| m.get(name)) {
                    out.push(child);
                }
            }
            if out.is_empty() {
                return Err(ExprError::NotFound(name.clone()));
            }
        }
        Step::Fields(names) => {
            for value in input {
                if let Some(map) = value.as_object() {
                    out.extend(names.iter().filter_map(|n| map.get(n)));
                }
            }
            if out.is_empty() {
                return Err(ExprError::NotFound(names.join(",")));
            }
        }
        Step::Wildcard => {
            for value in input {
                match value {
                    Value::Object(map) => out.extend(map.values()),
                    Value::Array(items) => out.extend(items.iter()),
                    _ => {}
                }
            }
        }
        Step::Recursive(name) => {
            for value in input {
                descend(value, name.as_deref(), &mut out);
            }
            if let (Some(name), true) = (name, out.is_empty()) {
                return Err(ExprError::NotFound(name.clone()));
            }
        }
        Step::Index(indexes) => {
            for value in input {
                let Some(items) = value.as_array() else {
                    continue;
                };
                for &index in indexes {
                    let resolved = if index < 0 {
                        items.len() as i64 + index
                    } else {
                        index
                    };
                    match usize::try_from(resolved).ok().and_then(|i| items.get(i)) {
                        Some(item) => out.push(item),
                        None => {
                            return Err(ExprError::NotFound(format!(
                                "index {} (array length {})",
                                index,
                                items.len()
                            )));
                        }
                    }
                }
            }
        }
        Step::Slice { start, end, step } => {
            for value in input {
                if let Some(items) = value.as_array() {
                    out.extend(slice(items, *start, *end, *step));
                }
            }
        }
        Step::Filter(filter) => {
            for value in input {
                if let Some(items) = value.as_array() {
                    out.extend(items.iter().filter(|item| filter_matches(filter, item)));
                }
            }
        }
    }
    Ok(out)
}

fn descend<'v>(value: &'v Value, name: Option<&str>, out: &mut Vec<&'v Value>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if name.is_none_or(|n| n == key) {
                    out.push(child);
                }
                descend(child, name, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                if name.is_none() {
                    out.push(child);
                }
                descend(child, name, out);
            }
        }
        _ => {}
    }
}

fn slice(items: &[Value], start: Option<i64>, end: Option<i64>, step: i64) -> Vec<&Value> {
    let len = items.len() as i64;
    let clamp = |i: i64| -> i64 {
        let i = if i < 0 { len + i } else { i };
        i.clamp(0, len)
    };
    let start = start.map_or(0, clamp) as usize;
    let end = end.map_or(len, clamp) as usize;
    let step = usize::try_from(step).unwrap_or(usize::MAX).max(1);

    items
        .get(start..end.max(start))
        .unwrap_or_default()
        .iter()
        .step_by(step)
        .collect()
}

fn filter_matches(filter: &Filter, item: &Value) -> bool {
    match filter {
        Filter::Exists(steps) => select(steps, item).is_ok_and(|m| !m.is_empty()),
        Filter::Not(inner) => !filter_matches(inner, item),
        Filter::And(a, b) => filter_matches(a, item) && filter_matches(b, item),
        Filter::Or(a, b) => filter_matches(a, item) || filter_matches(b, item),
        Filter::Compare { left, op, right } => {
            match (resolve_operand(left, item), resolve_operand(right, item)) {
                (Some(l), Some(r)) => compare(l, *op, r),
                _ => false,
            }
        }
    }
}

fn resolve_operand<'v>(operand: &'v Operand, item: &'v Value) -> Option<&'v Value> {
    match operand {
        Operand::Literal(value) => Some(value),
        Operand::Path(steps) => select(steps, item).ok().and_then(|m| m.last().copied()),
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    let ordering = match (left, right) {
        (Value::Number(l), Value::Number(r)) => match (l.as_f64(), r.as_f64()) {
            (Some(l), Some(r)) => l.partial_cmp(&r),
            _ => None,
        },
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (l, r) if l == r => Some(Ordering::Equal),
        _ => None,
    };

    match (op, ordering) {
        (CmpOp::Eq, ordering) => ordering == Some(Ordering::Equal),
        (CmpOp::Ne, ordering) => ordering != Some(Ordering::Equal),
        (CmpOp::Lt, Some(o)) => o == Ordering::Less,
        (CmpOp::Le, Some(o)) => o != Ordering::Greater,
        (CmpOp::Gt, Some(o)) => o == Ordering::Greater,
        (CmpOp::Ge, Some(o)) => o != Ordering::Less,
        (_, None) => false,
    }
}

struct PathParser<'t> {
    chars: Vec<char>,
    pos: usize,
    template: &'t str,
}

impl PathParser<'_> {
    fn error(&self, reason: impl Into<String>) -> ExprError {
        let reason = reason.into();
        parse_error(self.template, format!("{} at offset {}", reason, self.pos))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, c: char) -> Result<(), ExprError> {
        self.skip_ws();
        if self.peek() == Some(c) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}", c)))
        }
    }

    fn is_name_char(c: char, in_filter: bool) -> bool {
        if c == '.' || c == '[' || c.is_whitespace() {
            return false;
        }
        !(in_filter && "()=!<>&|,]".contains(c))
    }

    fn parse_name(&mut self, in_filter: bool) -> Result<String, ExprError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| Self::is_name_char(c, in_filter)) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.error("expected a field name"));
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    /// Parse path steps. In filters, stops at the first character that
    /// cannot continue a path.
    fn parse_steps(&mut self, in_filter: bool) -> Result<Vec<Step>, ExprError> {
        let mut steps = Vec::new();

        if matches!(self.peek(), Some('$') | Some('@')) {
            self.pos += 1;
        } else if self.peek().is_some_and(|c| Self::is_name_char(c, in_filter)) {
            steps.push(Step::Field(self.parse_name(in_filter)?));
        }

        loop {
            match self.peek() {
                Some('.') if self.peek_at(1) == Some('.') => {
                    self.pos += 2;
                    if self.peek() == Some('*') {
                        self.pos += 1;
                        steps.push(Step::Recursive(None));
                    } else {
                        steps.push(Step::Recursive(Some(self.parse_name(in_filter)?)));
                    }
                }
                Some('.') => {
                    self.pos += 1;
                    match self.peek() {
                        Some('*') => {
                            self.pos += 1;
                            steps.push(Step::Wildcard);
                        }
                        Some(c) if Self::is_name_char(c, in_filter) => {
                            steps.push(Step::Field(self.parse_name(in_filter)?));
                        }
                        // A lone trailing dot selects the current node.
                        _ => {}
                    }
                }
                Some('[') => {
                    self.pos += 1;
                    steps.push(self.parse_bracket()?);
                }
                _ => break,
            }
        }

        Ok(steps)
    }

    fn parse_bracket(&mut self) -> Result<Step, ExprError> {
        self.skip_ws();
        let step = match self.peek() {
            Some('*') => {
                self.pos += 1;
                Step::Wildcard
            }
            Some('?') => {
                self.pos += 1;
                self.expect('(')?;
                let filter = self.parse_or()?;
                self.expect(')')?;
                Step::Filter(filter)
            }
            Some('\'') | Some('"') => {
                let mut names = vec![self.parse_quoted()?];
                self.skip_ws();
                while self.peek() == Some(',') {
                    self.pos += 1;
                    self.skip_ws();
                    names.push(self.parse_quoted()?);
                    self.skip_ws();
                }
                if names.len() == 1 {
                    Step::Field(names.remove(0))
                } else {
                    Step::Fields(names)
                }
            }
            _ => self.parse_index_or_slice()?,
        };
        self.expect(']')?;
        Ok(step)
    }

    fn parse_index_or_slice(&mut self) -> Result<Step, ExprError> {
        let first = self.parse_optional_int()?;
        self.skip_ws();

        if self.peek() == Some(':') {
            self.pos += 1;
            let end = self.parse_optional_int()?;
            self.skip_ws();
            let mut step = 1;
            if self.peek() == Some(':') {
                self.pos += 1;
                step = self.parse_optional_int()?.unwrap_or(1);
            }
            if step <= 0 {
                return Err(self.error("slice step must be positive"));
            }
            return Ok(Step::Slice {
                start: first,
                end,
                step,
            });
        }

        let first = first.ok_or_else(|| self.error("expected an index"))?;
        let mut indexes = vec![first];
        self.skip_ws();
        while self.peek() == Some(',') {
            self.pos += 1;
            let next = self
                .parse_optional_int()?
                .ok_or_else(|| self.error("expected an index"))?;
            indexes.push(next);
            self.skip_ws();
        }
        Ok(Step::Index(indexes))
    }

    fn parse_optional_int(&mut self) -> Result<Option<i64>, ExprError> {
        self.skip_ws();
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.pos == start {
            return Ok(None);
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<i64>()
            .map(Some)
            .map_err(|_| self.error(format!("invalid index {:?}", text)))
    }

    fn parse_quoted(&mut self) -> Result<String, ExprError> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected a quoted string")),
        };
        self.pos += 1;

        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated string")),
                Some('\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c) => out.push(c),
                        None => return Err(self.error("unterminated string")),
                    }
                }
                Some(c) if c == quote => break,
                Some(c) => out.push(c),
            }
            self.pos += 1;
        }
        self.pos += 1;
        Ok(out)
    }

    fn parse_or(&mut self) -> Result<Filter, ExprError> {
        let mut left = self.parse_and()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('|') && self.peek_at(1) == Some('|') {
                self.pos += 2;
                let right = self.parse_and()?;
                left = Filter::Or(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_and(&mut self) -> Result<Filter, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            self.skip_ws();
            if self.peek() == Some('&') && self.peek_at(1) == Some('&') {
                self.pos += 2;
                let right = self.parse_unary()?;
                left = Filter::And(Box::new(left), Box::new(right));
            } else {
                return Ok(left);
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Filter, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('!') if self.peek_at(1) != Some('=') => {
                self.pos += 1;
                Ok(Filter::Not(Box::new(self.parse_unary()?)))
            }
            Some('(') => {
                self.pos += 1;
                let inner = self.parse_or()?;
                self.expect(')')?;
                Ok(inner)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_comparison(&mut self) -> Result<Filter, ExprError> {
        let left = self.parse_operand()?;
        self.skip_ws();

        let op = match (self.peek(), self.peek_at(1)) {
            (Some('='), Some('=')) => Some((CmpOp::Eq, 2)),
            (Some('!'), Some('=')) => Some((CmpOp::Ne, 2)),
            (Some('<'), Some('=')) => Some((CmpOp::Le, 2)),
            (Some('>'), Some('=')) => Some((CmpOp::Ge, 2)),
            (Some('<'), _) => Some((CmpOp::Lt, 1)),
            (Some('>'), _) => Some((CmpOp::Gt, 1)),
            _ => None,
        };

        match (op, left) {
            (Some((op, width)), left) => {
                self.pos += width;
                let right = self.parse_operand()?;
                Ok(Filter::Compare { left, op, right })
            }
            (None, Operand::Path(steps)) => Ok(Filter::Exists(steps)),
            (None, Operand::Literal(_)) => Err(self.error("expected a comparison operator")),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ExprError> {
        self.skip_ws();
        match self.peek() {
            Some('@') => Ok(Operand::Path(self.parse_steps(true)?)),
            Some('\'') | Some('"') => Ok(Operand::Literal(Value::String(self.parse_quoted()?))),
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                self.pos += 1;
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_digit() || "+-.eE".contains(c))
                {
                    self.pos += 1;
                }
                let text: String = self.chars[start..self.pos].iter().collect();
                serde_json::from_str::<Value>(&text)
                    .ok()
                    .filter(Value::is_number)
                    .map(Operand::Literal)
                    .ok_or_else(|| self.error(format!("invalid number {:?}", text)))
            }
            Some(_) => {
                let word = self.parse_name(true)?;
                match word.as_str() {
                    "true" => Ok(Operand::Literal(Value::Bool(true))),
                    "false" => Ok(Operand::Literal(Value::Bool(false))),
                    "null" => Ok(Operand::Literal(Value::Null)),
                    other => Err(self.error(format!("unexpected token {:?}", other))),
                }
            }
            None => Err(self.error("unexpected end of filter")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn document() -> Value {
        json!({
            "counter": 1234,
            "timestamp": 1700000000000i64,
            "location": "mars",
            "nothing": null,
            "values": [
                {"id": "id-A", "count": 1, "some_boolean": true, "state": "ACTIVE"},
                {"id": "id-B", "count": 2, "some_boolean": true, "state": "INACTIVE"},
                {"id": "id-C", "count": 3, "some_boolean": false, "state": "ACTIVE"}
            ],
            "nested": {"a": {"leaf": 1}, "b": {"leaf": 2}}
        })
    }

    fn text(expr: &str) -> Result<String, ExprError> {
        JsonPathTemplate::parse(expr)?.render_text(&document())
    }

    fn json_out(expr: &str) -> Value {
        let rendered = JsonPathTemplate::parse(expr)
            .unwrap()
            .render_json(&document())
            .unwrap();
        serde_json::from_str(&rendered).unwrap()
    }

    #[test]
    fn test_simple_field() {
        assert_eq!(text("{.counter}").unwrap(), "1234");
        assert_eq!(text("{ .counter }").unwrap(), "1234");
        assert_eq!(text("{$.counter}").unwrap(), "1234");
        assert_eq!(text("{.location}").unwrap(), "mars");
    }

    #[test]
    fn test_null_renders_sentinel() {
        assert_eq!(text("{.nothing}").unwrap(), NULL_SENTINEL);
    }

    #[test]
    fn test_last_match_wins() {
        assert_eq!(text("{.values[*].id}").unwrap(), "id-C");
        assert_eq!(text("{..leaf}").unwrap(), "2");
    }

    #[test]
    fn test_text_and_actions_mix() {
        assert_eq!(text("planet-{.location}").unwrap(), "planet-mars");
        assert_eq!(text("{.location}/{.counter}").unwrap(), "mars/1234");
    }

    #[test]
    fn test_not_found() {
        let err = text("{.missing}").unwrap_err();
        assert!(err.is_not_found());
        assert!(text("{.values[?(@.state == \"GONE\")].id}").unwrap_err().is_not_found());
    }

    #[test]
    fn test_index_and_slice() {
        assert_eq!(text("{.values[0].id}").unwrap(), "id-A");
        assert_eq!(text("{.values[-1].id}").unwrap(), "id-C");
        assert_eq!(json_out("{.values[0:2].id}"), json!(["id-A", "id-B"]));
        assert_eq!(json_out("{.values[::2].id}"), json!(["id-A", "id-C"]));
        assert_eq!(json_out("{.values[0,2].count}"), json!([1, 3]));
        assert!(text("{.values[7]}").unwrap_err().is_not_found());
    }

    #[test]
    fn test_slice_extreme_bounds() {
        assert_eq!(
            json_out("{.values[1::9223372036854775807].id}"),
            json!(["id-B"])
        );
        assert_eq!(
            json_out("{.values[-9223372036854775808:9223372036854775807:2].id}"),
            json!(["id-A", "id-C"])
        );
        assert_eq!(json_out("{.values[2:1]}"), json!([]));
    }

    #[test]
    fn test_bracket_fields() {
        assert_eq!(text("{['counter']}").unwrap(), "1234");
        assert_eq!(json_out("{.nested['a','b'].leaf}"), json!([1, 2]));
    }

    #[test]
    fn test_filter_equality() {
        let out = json_out("{.values[?(@.state == \"ACTIVE\")]}");
        let ids: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["id-A", "id-C"]);
    }

    #[test]
    fn test_filter_numeric_and_logic() {
        assert_eq!(json_out("{.values[?(@.count > 1)].id}"), json!(["id-B", "id-C"]));
        assert_eq!(
            json_out("{.values[?(@.count >= 2 && @.state == 'ACTIVE')].id}"),
            json!(["id-C"])
        );
        assert_eq!(
            json_out("{.values[?(@.count == 1 || @.count == 3)].id}"),
            json!(["id-A", "id-C"])
        );
        assert_eq!(
            json_out("{.values[?(!(@.some_boolean == true))].id}"),
            json!(["id-C"])
        );
    }

    #[test]
    fn test_filter_existence() {
        let doc = json!({"items": [{"a": 1}, {"b": 2}, {"a": null}]});
        let template = JsonPathTemplate::parse("{.items[?(@.a)]}").unwrap();
        assert_eq!(template.collect(&doc).unwrap().len(), 2);
    }

    #[test]
    fn test_wildcard_on_object() {
        assert_eq!(json_out("{.nested.*.leaf}"), json!([1, 2]));
    }

    #[test]
    fn test_empty_filter_is_empty_collection() {
        assert_eq!(json_out("{.values[?(@.state == 'GONE')]}"), json!([]));
    }

    #[test]
    fn test_objects_render_as_json() {
        assert_eq!(text("{.nested.a}").unwrap(), "{\"leaf\":1}");
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["{.counter", "{}", "{.values[?(@.a ==)]}", "{.values[0:1:0]}", "{.a b}"] {
            let err = JsonPathTemplate::parse(bad).unwrap_err();
            assert!(err.is_compile_error(), "{} should not parse", bad);
        }
    }

    #[test]
    fn test_quoted_brace_inside_filter() {
        let doc = json!({"items": [{"name": "a}b", "v": 1}, {"name": "c", "v": 2}]});
        let template = JsonPathTemplate::parse("{.items[?(@.name == 'a}b')].v}").unwrap();
        assert_eq!(template.render_text(&doc).unwrap(), "1");
    }

    #[test]
    fn test_display_round_trips_source() {
        let template = JsonPathTemplate::parse("id-{.values[0].id}").unwrap();
        assert_eq!(template.to_string(), "id-{.values[0].id}");
    }
}
