//! Path expressions over semi-structured (`serde_json::Value`) trees.
//!
//! Supported syntax, a practical subset of JSONPath:
//!
//! - optional leading `$`; the first field may omit its dot (`spec.replicas`)
//! - `.name`, `['name']`, `["name"]` for field access (quote keys containing dots or slashes)
//! - `[N]` for list index, negative values count from the end
//! - `.*` / `[*]` wildcard over list items or map values
//! - `[?(@.field == 'value')]`, `!=`, or bare `[?(@.field)]` to select list items by a key
//!
//! `get` returns every match, `set` builds intermediate containers when a field or index
//! is missing, `delete` is a no-op when nothing resolves.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use smallvec::SmallVec;

use crate::semantic::scalar_eq;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathError {
    #[error("empty path expression")]
    Empty,
    #[error("unable to parse path '{path}' at offset {pos}: {reason}")]
    Parse { path: String, pos: usize, reason: String },
    #[error("multi-valued path '{0}' not supported when reconciling properties")]
    MultiValued(String),
    #[error("unable to apply path '{path}': {reason}")]
    Apply { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
}

/// Filter predicate `?(@.a.b <op> literal)`; `cmp == None` tests existence only.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Vec<String>,
    pub cmp: Option<(CmpOp, Value)>,
}

impl Predicate {
    fn matches(&self, item: &Value) -> bool {
        let mut cur = item;
        for key in &self.field {
            match cur.get(key.as_str()) {
                Some(v) => cur = v,
                None => return matches!(self.cmp, Some((CmpOp::Ne, _))),
            }
        }
        match &self.cmp {
            None => !cur.is_null(),
            Some((CmpOp::Eq, lit)) => scalar_eq(cur, lit),
            Some((CmpOp::Ne, lit)) => !scalar_eq(cur, lit),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Field(String),
    Index(i64),
    Wildcard,
    Filter(Predicate),
}

impl Segment {
    /// Whether `v` has the container shape this segment navigates into.
    fn accepts(&self, v: &Value) -> bool {
        match self {
            Segment::Field(_) => v.is_object(),
            Segment::Index(_) => v.is_array(),
            Segment::Wildcard | Segment::Filter(_) => v.is_object() || v.is_array(),
        }
    }

    fn empty_container(&self) -> Option<Value> {
        match self {
            Segment::Field(_) => Some(Value::Object(Map::new())),
            Segment::Index(_) => Some(Value::Array(Vec::new())),
            // nothing to fan out over in a fresh container
            Segment::Wildcard | Segment::Filter(_) => None,
        }
    }

    fn select<'a>(&self, v: &'a Value, out: &mut Vec<&'a Value>) {
        match (self, v) {
            (Segment::Field(k), Value::Object(map)) => out.extend(map.get(k)),
            (Segment::Index(i), Value::Array(arr)) => {
                if let Some(idx) = resolve_index(*i, arr.len()) {
                    out.push(&arr[idx]);
                }
            }
            (Segment::Wildcard, Value::Object(map)) => out.extend(map.values()),
            (Segment::Wildcard, Value::Array(arr)) => out.extend(arr.iter()),
            (Segment::Filter(p), Value::Array(arr)) => out.extend(arr.iter().filter(|x| p.matches(x))),
            (Segment::Filter(p), Value::Object(map)) => out.extend(map.values().filter(|x| p.matches(x))),
            _ => {}
        }
    }
}

fn resolve_index(i: i64, len: usize) -> Option<usize> {
    let idx = if i < 0 { len as i64 + i } else { i };
    if idx >= 0 && (idx as usize) < len { Some(idx as usize) } else { None }
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    raw: String,
    segments: SmallVec<[Segment; 6]>,
}

impl PathExpr {
    pub fn parse(src: &str) -> Result<Self, PathError> {
        let segments = Parser::new(src).run()?;
        if segments.is_empty() {
            return Err(PathError::Empty);
        }
        Ok(Self { raw: src.to_string(), segments })
    }

    pub fn as_str(&self) -> &str { &self.raw }

    pub fn segments(&self) -> &[Segment] { &self.segments }

    /// All values selected by the expression (0, 1 or many).
    pub fn get<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut cur: Vec<&'a Value> = vec![root];
        for seg in self.segments.iter() {
            let mut next = Vec::with_capacity(cur.len());
            for v in cur {
                seg.select(v, &mut next);
            }
            if next.is_empty() {
                return next;
            }
            cur = next;
        }
        cur
    }

    /// Write `value` at every location the expression resolves to, creating missing
    /// maps/lists along field and index segments. Returns the number of writes.
    pub fn set(&self, root: &mut Value, value: &Value) -> Result<usize, PathError> {
        let mut writes = 0usize;
        self.set_at(root, &self.segments, value, &mut writes)?;
        Ok(writes)
    }

    fn set_at(&self, v: &mut Value, segs: &[Segment], value: &Value, writes: &mut usize) -> Result<(), PathError> {
        let Some((seg, rest)) = segs.split_first() else { return Ok(()) };
        if v.is_null() {
            if let Some(c) = seg.empty_container() {
                *v = c;
            }
        }
        match seg {
            Segment::Field(key) => {
                let map = v.as_object_mut().ok_or_else(|| self.apply_err(format!("expected a map at field '{}'", key)))?;
                if rest.is_empty() {
                    map.insert(key.clone(), value.clone());
                    *writes += 1;
                    return Ok(());
                }
                if !map.contains_key(key) && rest[0].empty_container().is_none() {
                    return Ok(());
                }
                let child = map.entry(key.clone()).or_insert(Value::Null);
                self.set_at(child, rest, value, writes)
            }
            Segment::Index(i) => {
                let arr = v.as_array_mut().ok_or_else(|| self.apply_err(format!("expected a list at index [{}]", i)))?;
                let idx = match resolve_index(*i, arr.len()) {
                    Some(idx) => idx,
                    None if *i >= 0 => *i as usize,
                    // counting from the end past the front: grow the list at the front
                    None => {
                        if !rest.is_empty() && rest[0].empty_container().is_none() {
                            return Ok(());
                        }
                        let missing = i.unsigned_abs() as usize - arr.len();
                        arr.splice(0..0, std::iter::repeat(Value::Null).take(missing));
                        0
                    }
                };
                if idx >= arr.len() {
                    if !rest.is_empty() && rest[0].empty_container().is_none() {
                        return Ok(());
                    }
                    arr.resize(idx + 1, Value::Null);
                }
                if rest.is_empty() {
                    arr[idx] = value.clone();
                    *writes += 1;
                    return Ok(());
                }
                self.set_at(&mut arr[idx], rest, value, writes)
            }
            Segment::Wildcard | Segment::Filter(_) => {
                let children: Vec<&mut Value> = match (seg, v) {
                    (Segment::Filter(p), Value::Array(arr)) => arr.iter_mut().filter(|x| p.matches(x)).collect(),
                    (Segment::Filter(p), Value::Object(map)) => map.values_mut().filter(|x| p.matches(x)).collect(),
                    (_, Value::Array(arr)) => arr.iter_mut().collect(),
                    (_, Value::Object(map)) => map.values_mut().collect(),
                    _ => Vec::new(),
                };
                for child in children {
                    if rest.is_empty() {
                        *child = value.clone();
                        *writes += 1;
                    } else if rest[0].accepts(child) {
                        self.set_at(child, rest, value, writes)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Remove every location the expression resolves to. Returns the number of removals;
    /// zero when the path does not currently resolve.
    pub fn delete(&self, root: &mut Value) -> usize {
        del_at(root, &self.segments)
    }

    /// One concrete (field/index only) expression per location matched in `root`.
    pub fn resolve(&self, root: &Value) -> Vec<PathExpr> {
        let mut out = Vec::new();
        let mut prefix = SmallVec::new();
        resolve_at(root, &self.segments, &mut prefix, &mut out);
        out.into_iter().map(PathExpr::concrete).collect()
    }

    /// Expression for the enclosing location; `None` for a single-segment path.
    pub fn parent(&self) -> Option<PathExpr> {
        let (_, head) = self.segments.split_last()?;
        if head.is_empty() {
            return None;
        }
        Some(PathExpr::concrete(head.iter().cloned().collect()))
    }

    fn concrete(segments: SmallVec<[Segment; 6]>) -> Self {
        let mut raw = String::from("$");
        for seg in segments.iter() {
            match seg {
                Segment::Field(k) => raw.push_str(&format!("['{}']", k.replace('\\', "\\\\").replace('\'', "\\'"))),
                Segment::Index(i) => raw.push_str(&format!("[{}]", i)),
                Segment::Wildcard => raw.push_str("[*]"),
                Segment::Filter(_) => raw.push_str("[?()]"),
            }
        }
        Self { raw, segments }
    }

    fn apply_err(&self, reason: String) -> PathError {
        PathError::Apply { path: self.raw.clone(), reason }
    }
}

fn resolve_at(v: &Value, segs: &[Segment], prefix: &mut SmallVec<[Segment; 6]>, out: &mut Vec<SmallVec<[Segment; 6]>>) {
    let Some((seg, rest)) = segs.split_first() else {
        out.push(prefix.clone());
        return;
    };
    let mut descend = |step: Segment, child: &Value, prefix: &mut SmallVec<[Segment; 6]>| {
        prefix.push(step);
        resolve_at(child, rest, prefix, out);
        prefix.pop();
    };
    match (seg, v) {
        (Segment::Field(k), Value::Object(map)) => {
            if let Some(c) = map.get(k) {
                descend(Segment::Field(k.clone()), c, prefix);
            }
        }
        (Segment::Index(i), Value::Array(arr)) => {
            if let Some(idx) = resolve_index(*i, arr.len()) {
                descend(Segment::Index(idx as i64), &arr[idx], prefix);
            }
        }
        (Segment::Wildcard, Value::Object(map)) => {
            for (k, c) in map.iter() {
                descend(Segment::Field(k.clone()), c, prefix);
            }
        }
        (Segment::Wildcard, Value::Array(arr)) => {
            for (idx, c) in arr.iter().enumerate() {
                descend(Segment::Index(idx as i64), c, prefix);
            }
        }
        (Segment::Filter(p), Value::Object(map)) => {
            for (k, c) in map.iter().filter(|(_, c)| p.matches(c)) {
                descend(Segment::Field(k.clone()), c, prefix);
            }
        }
        (Segment::Filter(p), Value::Array(arr)) => {
            for (idx, c) in arr.iter().enumerate().filter(|(_, c)| p.matches(c)) {
                descend(Segment::Index(idx as i64), c, prefix);
            }
        }
        _ => {}
    }
}

fn del_at(v: &mut Value, segs: &[Segment]) -> usize {
    let Some((seg, rest)) = segs.split_first() else { return 0 };
    if rest.is_empty() {
        return match (seg, v) {
            (Segment::Field(k), Value::Object(map)) => map.remove(k).map_or(0, |_| 1),
            (Segment::Index(i), Value::Array(arr)) => match resolve_index(*i, arr.len()) {
                Some(idx) => {
                    arr.remove(idx);
                    1
                }
                None => 0,
            },
            (Segment::Wildcard, Value::Object(map)) => {
                let n = map.len();
                map.clear();
                n
            }
            (Segment::Wildcard, Value::Array(arr)) => {
                let n = arr.len();
                arr.clear();
                n
            }
            (Segment::Filter(p), Value::Array(arr)) => {
                let before = arr.len();
                arr.retain(|x| !p.matches(x));
                before - arr.len()
            }
            (Segment::Filter(p), Value::Object(map)) => {
                let before = map.len();
                map.retain(|_, x| !p.matches(x));
                before - map.len()
            }
            _ => 0,
        };
    }
    match (seg, v) {
        (Segment::Field(k), Value::Object(map)) => map.get_mut(k).map_or(0, |c| del_at(c, rest)),
        (Segment::Index(i), Value::Array(arr)) => match resolve_index(*i, arr.len()) {
            Some(idx) => del_at(&mut arr[idx], rest),
            None => 0,
        },
        (Segment::Wildcard, Value::Object(map)) => map.values_mut().map(|c| del_at(c, rest)).sum(),
        (Segment::Wildcard, Value::Array(arr)) => arr.iter_mut().map(|c| del_at(c, rest)).sum(),
        (Segment::Filter(p), Value::Array(arr)) => arr.iter_mut().filter(|x| p.matches(x)).map(|c| del_at(c, rest)).sum(),
        (Segment::Filter(p), Value::Object(map)) => map.values_mut().filter(|x| p.matches(x)).map(|c| del_at(c, rest)).sum(),
        _ => 0,
    }
}

impl FromStr for PathExpr {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.raw) }
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self { Self { src, pos: 0 } }

    fn peek(&self) -> Option<char> { self.src[self.pos..].chars().next() }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.src[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    fn err(&self, reason: impl Into<String>) -> PathError {
        PathError::Parse { path: self.src.to_string(), pos: self.pos, reason: reason.into() }
    }

    fn expect(&mut self, c: char) -> Result<(), PathError> {
        self.skip_ws();
        if self.eat(c) { Ok(()) } else { Err(self.err(format!("expected '{}'", c))) }
    }

    fn run(mut self) -> Result<SmallVec<[Segment; 6]>, PathError> {
        let mut out = SmallVec::new();
        self.skip_ws();
        self.eat('$');
        let mut first = true;
        while let Some(c) = self.peek() {
            let seg = match c {
                '.' => {
                    self.bump();
                    if self.eat('*') { Segment::Wildcard } else { Segment::Field(self.ident()?) }
                }
                '[' => {
                    self.bump();
                    self.bracket()?
                }
                _ if first => Segment::Field(self.ident()?),
                other => return Err(self.err(format!("unexpected character '{}'", other))),
            };
            out.push(seg);
            first = false;
        }
        Ok(out)
    }

    fn ident(&mut self) -> Result<String, PathError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || ".[]()'\"=!@?*".contains(c) {
                break;
            }
            self.bump();
        }
        if start == self.pos {
            return Err(self.err("expected field name"));
        }
        Ok(self.src[start..self.pos].to_string())
    }

    fn quoted(&mut self) -> Result<String, PathError> {
        let quote = match self.bump() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.err("expected quoted string")),
        };
        let mut s = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some(c) => s.push(c),
                    None => return Err(self.err("unterminated escape")),
                },
                Some(c) if c == quote => return Ok(s),
                Some(c) => s.push(c),
                None => return Err(self.err("unterminated string")),
            }
        }
    }

    fn bracket(&mut self) -> Result<Segment, PathError> {
        self.skip_ws();
        let seg = match self.peek() {
            Some('*') => {
                self.bump();
                Segment::Wildcard
            }
            Some('\'' | '"') => Segment::Field(self.quoted()?),
            Some('?') => {
                self.bump();
                Segment::Filter(self.predicate()?)
            }
            Some(c) if c == '-' || c.is_ascii_digit() => {
                let start = self.pos;
                self.bump();
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.bump();
                }
                let n = self.src[start..self.pos].parse::<i64>().map_err(|_| self.err("invalid index"))?;
                Segment::Index(n)
            }
            _ => return Err(self.err("expected index, '*', quoted key or filter")),
        };
        self.expect(']')?;
        Ok(seg)
    }

    fn predicate(&mut self) -> Result<Predicate, PathError> {
        self.expect('(')?;
        self.expect('@')?;
        let mut field = Vec::new();
        loop {
            if self.eat('.') {
                field.push(self.ident()?);
            } else if self.eat('[') {
                self.skip_ws();
                field.push(self.quoted()?);
                self.expect(']')?;
            } else {
                break;
            }
        }
        if field.is_empty() {
            return Err(self.err("expected field after '@'"));
        }
        self.skip_ws();
        if self.eat(')') {
            return Ok(Predicate { field, cmp: None });
        }
        let op = if self.eat_str("==") {
            CmpOp::Eq
        } else if self.eat_str("!=") {
            CmpOp::Ne
        } else {
            return Err(self.err("expected '==' or '!='"));
        };
        self.skip_ws();
        let lit = self.literal()?;
        self.expect(')')?;
        Ok(Predicate { field, cmp: Some((op, lit)) })
    }

    fn literal(&mut self) -> Result<Value, PathError> {
        if matches!(self.peek(), Some('\'' | '"')) {
            return Ok(Value::String(self.quoted()?));
        }
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ')' {
                break;
            }
            self.bump();
        }
        let tok = &self.src[start..self.pos];
        match tok {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            "null" => Ok(Value::Null),
            _ => tok
                .parse::<serde_json::Number>()
                .map(Value::Number)
                .map_err(|_| self.err(format!("invalid literal '{}'", tok))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn p(s: &str) -> PathExpr { PathExpr::parse(s).unwrap() }

    #[test]
    fn parses_dotted_bracketed_and_filters() {
        assert_eq!(p("spec.replicas").segments(), &[Segment::Field("spec".into()), Segment::Field("replicas".into())]);
        assert_eq!(p("$.spec").segments(), &[Segment::Field("spec".into())]);
        assert_eq!(
            p("metadata.annotations['example.com/hash']").segments()[2],
            Segment::Field("example.com/hash".into())
        );
        assert_eq!(p("spec.ports[*].nodePort").segments()[2], Segment::Wildcard);
        assert_eq!(p("items[-1]").segments()[1], Segment::Index(-1));
        match &p("spec.ports[?(@.name == 'http')]").segments()[2] {
            Segment::Filter(pr) => {
                assert_eq!(pr.field, vec!["name".to_string()]);
                assert_eq!(pr.cmp, Some((CmpOp::Eq, json!("http"))));
            }
            other => panic!("unexpected segment {:?}", other),
        }
    }

    #[test]
    fn parse_errors_are_reported() {
        assert_eq!(PathExpr::parse(""), Err(PathError::Empty));
        assert_eq!(PathExpr::parse("$"), Err(PathError::Empty));
        assert!(matches!(PathExpr::parse("spec..x"), Err(PathError::Parse { .. })));
        assert!(matches!(PathExpr::parse("spec[abc]"), Err(PathError::Parse { .. })));
        assert!(matches!(PathExpr::parse("spec['open"), Err(PathError::Parse { .. })));
        assert!(matches!(PathExpr::parse("spec[?(@.a ~ 1)]"), Err(PathError::Parse { .. })));
    }

    #[test]
    fn get_returns_all_matches() {
        let doc = json!({"spec": {"ports": [
            {"name": "http", "port": 80},
            {"name": "https", "port": 443}
        ]}});
        assert_eq!(p("spec.ports[0].port").get(&doc), vec![&json!(80)]);
        assert_eq!(p("spec.ports[-1].name").get(&doc), vec![&json!("https")]);
        assert_eq!(p("spec.ports[*].port").get(&doc).len(), 2);
        assert_eq!(p("spec.ports[?(@.name=='https')].port").get(&doc), vec![&json!(443)]);
        assert_eq!(p("spec.ports[?(@.port != 80)].name").get(&doc), vec![&json!("https")]);
        assert!(p("spec.missing.deep").get(&doc).is_empty());
        assert!(p("spec.ports.name").get(&doc).is_empty());
    }

    #[test]
    fn set_builds_intermediate_containers() {
        let mut doc = json!({});
        p("metadata.labels['app.kubernetes.io/name']").set(&mut doc, &json!("web")).unwrap();
        p("spec.containers[1].image").set(&mut doc, &json!("nginx")).unwrap();
        assert_eq!(doc["metadata"]["labels"]["app.kubernetes.io/name"], json!("web"));
        assert_eq!(doc["spec"]["containers"], json!([null, {"image": "nginx"}]));
    }

    #[test]
    fn negative_index_set_counts_from_the_end() {
        let mut doc = json!({"ports": [{"port": 80}, {"port": 81}]});
        p("ports[-1].port").set(&mut doc, &json!(9999)).unwrap();
        assert_eq!(doc["ports"], json!([{"port": 80}, {"port": 9999}]));

        // a fresh or short list grows at the front
        let mut fresh = json!({});
        p("spec.ports[-1].port").set(&mut fresh, &json!(81)).unwrap();
        assert_eq!(fresh["spec"]["ports"], json!([{"port": 81}]));
        p("spec.ports[-3]").set(&mut fresh, &json!("x")).unwrap();
        assert_eq!(fresh["spec"]["ports"], json!(["x", null, {"port": 81}]));
    }

    #[test]
    fn set_through_filter_updates_matching_items_only() {
        let mut doc = json!({"ports": [{"name": "http", "port": 80}, {"name": "admin", "port": 9000}]});
        let n = p("ports[?(@.name=='admin')].port").set(&mut doc, &json!(9090)).unwrap();
        assert_eq!(n, 1);
        assert_eq!(doc["ports"][1]["port"], json!(9090));
        assert_eq!(doc["ports"][0]["port"], json!(80));
        // nothing to fan out over: no write, no error
        assert_eq!(p("missing[*].x").set(&mut doc, &json!(1)).unwrap(), 0);
        assert!(doc.get("missing").is_none());
    }

    #[test]
    fn set_rejects_shape_mismatch() {
        let mut doc = json!({"spec": "scalar"});
        assert!(matches!(p("spec.replicas").set(&mut doc, &json!(1)), Err(PathError::Apply { .. })));
    }

    #[test]
    fn resolve_yields_concrete_locations() {
        let doc = json!({"spec": {"ports": [
            {"name": "http", "port": 80, "nodePort": 30080},
            {"name": "grpc", "port": 81},
            {"name": "admin", "port": 82, "nodePort": 30082}
        ]}});
        let found = p("spec.ports[*].nodePort").resolve(&doc);
        let raws: Vec<_> = found.iter().map(|e| e.as_str().to_string()).collect();
        assert_eq!(raws, vec!["$['spec']['ports'][0]['nodePort']", "$['spec']['ports'][2]['nodePort']"]);
        assert_eq!(found[1].get(&doc), vec![&json!(30082)]);
        assert_eq!(found[1].parent().unwrap().get(&doc)[0]["name"], json!("admin"));
        assert_eq!(p("spec.ports[?(@.name == 'grpc')]").resolve(&doc)[0].segments()[2], Segment::Index(1));
        assert!(p("spec").parent().is_none());
        assert!(p("status.x").resolve(&doc).is_empty());
    }

    #[test]
    fn delete_is_noop_when_unresolved() {
        let mut doc = json!({"ports": [{"name": "http", "nodePort": 30080}, {"name": "x"}]});
        assert_eq!(p("ports[*].nodePort").delete(&mut doc), 1);
        assert_eq!(doc, json!({"ports": [{"name": "http"}, {"name": "x"}]}));
        assert_eq!(p("spec.nothing").delete(&mut doc), 0);
        assert_eq!(p("ports[?(@.name=='x')]").delete(&mut doc), 1);
        assert_eq!(doc, json!({"ports": [{"name": "http"}]}));
    }
}
