//! Schema Rules - compile and check
//!
//! A schema is a JSON rule tree in the Kwalify style: `type`, `required`,
//! `mapping`, `sequence`, `enum`, `pattern`, `range`, `length`, `unique`.
//! Checking never stops at the first problem; every issue is returned.

use regex_lite::Regex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::locate::escape_segment;

/// Key of the default rule inside a `mapping`.
const DEFAULT_KEY: &str = "=";

/// A single problem found while compiling or checking, located by path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl Issue {
    fn new(path: &str, message: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", display_path(&self.path), self.message)
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Map,
    Seq,
    Str,
    Text,
    Int,
    Float,
    Number,
    Bool,
    Scalar,
    Any,
    /// Re-applies the root rule. Only the built-in meta-schema may use it.
    Root,
}

impl Kind {
    fn parse(name: &str, allow_root: bool) -> Option<Self> {
        Some(match name {
            "map" => Kind::Map,
            "seq" => Kind::Seq,
            "str" => Kind::Str,
            "text" => Kind::Text,
            "int" => Kind::Int,
            "float" => Kind::Float,
            "number" => Kind::Number,
            "bool" => Kind::Bool,
            "scalar" => Kind::Scalar,
            "any" => Kind::Any,
            "root" if allow_root => Kind::Root,
            _ => return None,
        })
    }

    fn name(self) -> &'static str {
        match self {
            Kind::Map => "map",
            Kind::Seq => "seq",
            Kind::Str => "str",
            Kind::Text => "text",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::Number => "number",
            Kind::Bool => "bool",
            Kind::Scalar => "scalar",
            Kind::Any => "any",
            Kind::Root => "root",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Kind::Map => value.is_object(),
            Kind::Seq => value.is_array(),
            Kind::Str => value.is_string(),
            Kind::Text => value.is_string() || value.is_number(),
            Kind::Int => value.is_i64() || value.is_u64(),
            Kind::Float => value.is_f64(),
            Kind::Number => value.is_number(),
            Kind::Bool => value.is_boolean(),
            Kind::Scalar => !value.is_object() && !value.is_array(),
            Kind::Any | Kind::Root => true,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Bounds {
    min: Option<f64>,
    max: Option<f64>,
    min_ex: Option<f64>,
    max_ex: Option<f64>,
}

impl Bounds {
    fn compile(value: &Value, path: &str, issues: &mut Vec<Issue>) -> Option<Self> {
        let map = value.as_object()?;
        let mut bounds = Bounds::default();
        for (key, bound) in map {
            let slot = match key.as_str() {
                "min" => &mut bounds.min,
                "max" => &mut bounds.max,
                "min-ex" => &mut bounds.min_ex,
                "max-ex" => &mut bounds.max_ex,
                _ => {
                    issues.push(Issue::new(&format!("{path}/{key}"), format!("unknown bound '{key}'.")));
                    continue;
                }
            };
            match bound.as_f64() {
                Some(n) => *slot = Some(n),
                None => issues.push(Issue::new(&format!("{path}/{key}"), "bound must be a number.")),
            }
        }
        Some(bounds)
    }

    /// Describe the first violated bound, if any.
    fn violation(&self, n: f64) -> Option<String> {
        if let Some(min) = self.min.filter(|min| n < *min) {
            return Some(format!("too small (< min {min})."));
        }
        if let Some(max) = self.max.filter(|max| n > *max) {
            return Some(format!("too large (> max {max})."));
        }
        if let Some(min) = self.min_ex.filter(|min| n <= *min) {
            return Some(format!("too small (<= min-ex {min})."));
        }
        if let Some(max) = self.max_ex.filter(|max| n >= *max) {
            return Some(format!("too large (>= max-ex {max})."));
        }
        None
    }
}

#[derive(Debug, Clone)]
struct Rule {
    kind: Kind,
    required: bool,
    unique: bool,
    enumeration: Option<Vec<Value>>,
    pattern: Option<Regex>,
    range: Option<Bounds>,
    length: Option<Bounds>,
    mapping: BTreeMap<String, Rule>,
    default_rule: Option<Box<Rule>>,
    sequence: Option<Box<Rule>>,
}

impl Rule {
    fn compile(value: &Value, path: &str, allow_root: bool, issues: &mut Vec<Issue>) -> Rule {
        let empty = Map::new();
        let def = value.as_object().unwrap_or_else(|| {
            issues.push(Issue::new(path, "rule must be a map."));
            &empty
        });

        let kind = match def.get("type") {
            None => Kind::Str,
            Some(name) => match name.as_str().and_then(|n| Kind::parse(n, allow_root)) {
                Some(kind) => kind,
                None => {
                    issues.push(Issue::new(&format!("{path}/type"), format!("unknown type {name}.")));
                    Kind::Any
                }
            },
        };

        let flag = |key: &str| def.get(key).and_then(Value::as_bool).unwrap_or(false);

        let pattern = def.get("pattern").and_then(Value::as_str).and_then(|raw| {
            let source = raw
                .strip_prefix('/')
                .and_then(|r| r.strip_suffix('/'))
                .unwrap_or(raw);
            match Regex::new(source) {
                Ok(re) => Some(re),
                Err(e) => {
                    issues.push(Issue::new(&format!("{path}/pattern"), format!("invalid pattern: {e}")));
                    None
                }
            }
        });

        let mut mapping = BTreeMap::new();
        let mut default_rule = None;
        if let Some(children) = def.get("mapping") {
            if kind != Kind::Map {
                issues.push(Issue::new(&format!("{path}/mapping"), "mapping is only allowed with type map."));
            }
            for (key, child) in children.as_object().into_iter().flatten() {
                let child_path = format!("{path}/mapping/{key}");
                let rule = Rule::compile(child, &child_path, allow_root, issues);
                if key == DEFAULT_KEY {
                    default_rule = Some(Box::new(rule));
                } else {
                    mapping.insert(key.clone(), rule);
                }
            }
        }

        let sequence = def.get("sequence").and_then(|items| {
            if kind != Kind::Seq {
                issues.push(Issue::new(&format!("{path}/sequence"), "sequence is only allowed with type seq."));
            }
            match items.as_array().map(Vec::as_slice) {
                Some([item]) => Some(Box::new(Rule::compile(
                    item,
                    &format!("{path}/sequence/0"),
                    allow_root,
                    issues,
                ))),
                _ => {
                    issues.push(Issue::new(&format!("{path}/sequence"), "sequence must contain exactly one rule."));
                    None
                }
            }
        });

        Rule {
            kind,
            required: flag("required"),
            unique: flag("unique"),
            enumeration: def.get("enum").and_then(Value::as_array).cloned(),
            pattern,
            range: def.get("range").and_then(|v| Bounds::compile(v, &format!("{path}/range"), issues)),
            length: def.get("length").and_then(|v| Bounds::compile(v, &format!("{path}/length"), issues)),
            mapping,
            default_rule,
            sequence,
        }
    }
}

/// A compiled schema.
#[derive(Debug, Clone)]
pub struct Schema {
    root: Rule,
}

impl Schema {
    /// Compile a schema document. Structural mistakes the meta-schema cannot
    /// express (bad patterns, misplaced `mapping`) come back as issues.
    pub fn compile(value: &Value) -> Result<Self, Vec<Issue>> {
        Self::compile_with(value, false)
    }

    fn compile_with(value: &Value, allow_root: bool) -> Result<Self, Vec<Issue>> {
        let mut issues = Vec::new();
        let root = Rule::compile(value, "", allow_root, &mut issues);
        if issues.is_empty() {
            Ok(Self { root })
        } else {
            Err(issues)
        }
    }

    /// The schema every schema document must satisfy.
    pub fn meta() -> Result<Self, Vec<Issue>> {
        Self::compile_with(&meta_schema(), true)
    }

    pub fn validate(&self, value: &Value) -> Vec<Issue> {
        let mut issues = Vec::new();
        let mut path = String::new();
        self.check(&self.root, value, &mut path, &mut issues);
        issues
    }

    fn check(&self, rule: &Rule, value: &Value, path: &mut String, issues: &mut Vec<Issue>) {
        if rule.kind == Kind::Root {
            return self.check(&self.root, value, path, issues);
        }
        if value.is_null() {
            if rule.required {
                issues.push(Issue::new(path, "value required but none."));
            }
            return;
        }
        if !rule.kind.accepts(value) {
            issues.push(Issue::new(
                path,
                format!("{}: not a {}.", brief(value), rule.kind.name()),
            ));
            return;
        }

        if let Some(allowed) = &rule.enumeration {
            if !allowed.contains(value) {
                issues.push(Issue::new(path, format!("{}: invalid value.", brief(value))));
            }
        }
        if let (Some(re), Some(text)) = (&rule.pattern, value.as_str()) {
            if !re.is_match(text) {
                issues.push(Issue::new(path, format!("{}: not matched to pattern.", brief(value))));
            }
        }
        if let (Some(bounds), Some(n)) = (&rule.range, value.as_f64()) {
            if let Some(why) = bounds.violation(n) {
                issues.push(Issue::new(path, format!("{}: {why}", brief(value))));
            }
        }
        if let (Some(bounds), Some(text)) = (&rule.length, value.as_str()) {
            if let Some(why) = bounds.violation(text.chars().count() as f64) {
                issues.push(Issue::new(path, format!("{}: length {why}", brief(value))));
            }
        }

        match value {
            Value::Object(map) => self.check_map(rule, map, path, issues),
            Value::Array(items) => self.check_seq(rule, items, path, issues),
            _ => {}
        }
    }

    fn check_map(&self, rule: &Rule, map: &Map<String, Value>, path: &mut String, issues: &mut Vec<Issue>) {
        if rule.kind != Kind::Map {
            return;
        }
        for (key, child) in &rule.mapping {
            if child.required && map.get(key).map_or(true, Value::is_null) {
                issues.push(Issue::new(path, format!("key '{key}' is required.")));
            }
        }
        for (key, value) in map {
            let child = rule
                .mapping
                .get(key)
                .or(rule.default_rule.as_deref());
            let len = path.len();
            path.push('/');
            path.push_str(&escape_segment(key));
            match child {
                Some(child) => {
                    if !(child.required && value.is_null()) {
                        self.check(child, value, path, issues);
                    }
                }
                None if rule.mapping.is_empty() && rule.default_rule.is_none() => {}
                None => issues.push(Issue::new(path, format!("key '{key}' is undefined."))),
            }
            path.truncate(len);
        }
    }

    fn check_seq(&self, rule: &Rule, items: &[Value], path: &mut String, issues: &mut Vec<Issue>) {
        let Some(item_rule) = rule.sequence.as_deref() else {
            return;
        };
        let item_rule = if item_rule.kind == Kind::Root { &self.root } else { item_rule };

        let mut seen = HashSet::new();
        let mut seen_keys: BTreeMap<&str, HashSet<String>> = BTreeMap::new();
        for (index, item) in items.iter().enumerate() {
            let len = path.len();
            path.push_str(&format!("/{index}"));
            self.check(item_rule, item, path, issues);

            if item_rule.unique && !item.is_null() && !seen.insert(item.to_string()) {
                issues.push(Issue::new(path, format!("{}: is already used.", brief(item))));
            }
            if let Value::Object(map) = item {
                for (key, child) in &item_rule.mapping {
                    let Some(field) = map.get(key).filter(|v| child.unique && !v.is_null()) else {
                        continue;
                    };
                    if !seen_keys.entry(key.as_str()).or_default().insert(field.to_string()) {
                        issues.push(Issue::new(
                            &format!("{path}/{}", escape_segment(key)),
                            format!("{}: is already used.", brief(field)),
                        ));
                    }
                }
            }
            path.truncate(len);
        }
    }
}

/// Short rendering of a value for messages.
fn brief(value: &Value) -> String {
    match value {
        Value::Object(_) => "<map>".to_string(),
        Value::Array(_) => "<seq>".to_string(),
        Value::String(s) => format!("'{s}'"),
        other => format!("'{other}'"),
    }
}

fn meta_schema() -> Value {
    let bounds = json!({
        "type": "map",
        "mapping": {
            "min": { "type": "number" },
            "max": { "type": "number" },
            "min-ex": { "type": "number" },
            "max-ex": { "type": "number" }
        }
    });
    json!({
        "type": "map",
        "mapping": {
            "type": {
                "type": "str",
                "enum": ["map", "seq", "str", "text", "int", "float", "number", "bool", "scalar", "any"]
            },
            "required": { "type": "bool" },
            "unique": { "type": "bool" },
            "enum": { "type": "seq", "sequence": [{ "type": "scalar" }] },
            "pattern": { "type": "str" },
            "range": bounds.clone(),
            "length": bounds,
            "mapping": { "type": "map", "mapping": { "=": { "type": "root" } } },
            "sequence": { "type": "seq", "sequence": [{ "type": "root" }] },
            "desc": { "type": "text" },
            "name": { "type": "str" },
            "class": { "type": "str" }
        }
    })
}
