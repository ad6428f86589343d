use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{PolymergeError, Result};

use super::types::{
    ClassDefinition, FunctionSignature, ImportInfo, SemanticContext,
};

// Full-line form handles return annotations containing ':' (e.g.
// `-> dict[str, int]`); the loose form catches one-liner bodies.
static DEF_LINE_FULL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(async\s+)?def\s+([A-Za-z_]\w*)\s*\((.*)\)\s*(?:->\s*(.+?))?\s*:\s*$").unwrap()
});
static DEF_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(async\s+)?def\s+([A-Za-z_]\w*)\s*\((.*)\)\s*(?:->\s*([^:]+?)\s*)?:").unwrap()
});
static CLASS_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^class\s+([A-Za-z_]\w*)\s*(?:\((.*)\))?\s*:").unwrap());
static SIMPLE_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*=\s*(.+)$").unwrap());
static ANNOTATED_ASSIGN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_]\w*)\s*:\s*([^=]+?)\s*(?:=.*)?$").unwrap());
static CALL_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z_][\w.]*)\s*\(").unwrap());

/// SHA-256 content hash used as the cache invalidation key.
pub fn content_hash(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Pluggable structural parser producing the semantic model. Implementations
/// exist per source language; the analyzer only depends on this trait.
pub trait StructuralParser: Send + Sync {
    /// Whether this parser understands the given path.
    fn handles(&self, file_path: &str) -> bool;

    /// Parse source text into a structural context. A `Parse` error means
    /// the file should be skipped, never that a batch should abort.
    fn parse(&self, file_path: &str, source: &str) -> Result<SemanticContext>;
}

/// Structured line parser for Python-style sources: def/class/import
/// grammar, decorator accumulation, module-level assignments.
#[derive(Debug, Default, Clone)]
pub struct PythonParser;

impl PythonParser {
    pub fn new() -> Self {
        Self
    }

    /// Default parser stack: structured pass first, signature-regex
    /// extraction as the fallback for files the structured pass rejects.
    pub fn with_fallback() -> FallbackParser {
        FallbackParser::new(Box::new(PythonParser::new()), Box::new(RegexParser::new()))
    }

    fn indent_of(line: &str) -> usize {
        let mut indent = 0;
        for ch in line.chars() {
            match ch {
                ' ' => indent += 1,
                '\t' => indent += 4,
                _ => break,
            }
        }
        indent
    }

    /// Join continuation lines until brackets balance. Errors when the
    /// statement never closes within the lookahead window.
    fn join_statement(lines: &[&str], start: usize, file_path: &str) -> Result<(String, usize)> {
        let mut joined = String::new();
        let mut depth: i32 = 0;
        for (offset, line) in lines[start..].iter().take(100).enumerate() {
            let code = strip_comment(line);
            if !joined.is_empty() {
                joined.push(' ');
            }
            joined.push_str(code.trim());
            depth += bracket_delta(code);
            if depth <= 0 {
                return Ok((joined, offset + 1));
            }
        }
        Err(PolymergeError::Parse {
            file: file_path.to_string(),
            reason: format!("unbalanced brackets starting at line {}", start + 1),
        })
    }

    fn parse_signature(
        statement: &str,
        line_number: usize,
        decorators: Vec<String>,
        file_path: &str,
    ) -> Result<FunctionSignature> {
        let captures = DEF_LINE_FULL
            .captures(statement)
            .or_else(|| DEF_LINE.captures(statement))
            .ok_or_else(|| PolymergeError::Parse {
                file: file_path.to_string(),
                reason: format!("malformed def statement at line {line_number}"),
            })?;

        let mut signature = FunctionSignature {
            name: captures[2].to_string(),
            is_async: captures.get(1).is_some(),
            return_type: captures.get(4).map(|m| m.as_str().trim().to_string()),
            decorators,
            line_number,
            ..Default::default()
        };

        let mut keyword_only = false;
        for param in split_top_level(&captures[3]) {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            if param == "*" {
                keyword_only = true;
            } else if let Some(rest) = param.strip_prefix("**") {
                signature.kwargs = Some(bare_name(rest));
            } else if let Some(rest) = param.strip_prefix('*') {
                signature.varargs = Some(bare_name(rest));
                keyword_only = true;
            } else {
                let (declaration, default) = match split_once_top_level(param, '=') {
                    Some((decl, default)) => (decl.trim().to_string(), Some(default.trim().to_string())),
                    None => (param.to_string(), None),
                };
                if keyword_only {
                    let key = bare_name(&declaration);
                    if let Some(default) = default {
                        signature.kw_defaults.insert(key, default);
                    }
                    signature.kwonly_args.push(declaration);
                } else {
                    signature.args.push(declaration);
                    if let Some(default) = default {
                        signature.defaults.push(default);
                    }
                }
            }
        }

        Ok(signature)
    }

    fn parse_imports(statement: &str) -> Vec<ImportInfo> {
        let mut imports = Vec::new();
        if let Some(rest) = statement.strip_prefix("import ") {
            for part in rest.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let (module, alias) = split_alias(part);
                imports.push(ImportInfo {
                    module,
                    name: None,
                    alias,
                });
            }
        } else if let Some(rest) = statement.strip_prefix("from ") {
            if let Some((module, names)) = rest.split_once(" import ") {
                let module = module.trim().to_string();
                let names = names.trim().trim_start_matches('(').trim_end_matches(')');
                for part in names.split(',') {
                    let part = part.trim();
                    if part.is_empty() || part == "*" {
                        continue;
                    }
                    let (name, alias) = split_alias(part);
                    imports.push(ImportInfo {
                        module: module.clone(),
                        name: Some(name),
                        alias,
                    });
                }
            }
        }
        imports
    }

    fn infer_literal_type(value: &str) -> String {
        let value = value.trim();
        if value.starts_with('"') || value.starts_with('\'') {
            return "str".to_string();
        }
        if value == "True" || value == "False" {
            return "bool".to_string();
        }
        if value == "None" {
            return "NoneType".to_string();
        }
        if value.parse::<i64>().is_ok() {
            return "int".to_string();
        }
        if value.parse::<f64>().is_ok() {
            return "float".to_string();
        }
        if value.starts_with('[') {
            return "list".to_string();
        }
        if value.starts_with('(') {
            return "tuple".to_string();
        }
        if value.starts_with('{') {
            let inner = &value[1..];
            let has_top_level_colon = split_top_level(inner.trim_end_matches('}'))
                .iter()
                .any(|entry| split_once_top_level(entry, ':').is_some());
            return if has_top_level_colon { "dict" } else { "set" }.to_string();
        }
        if let Some(captures) = CALL_VALUE.captures(value) {
            return captures[1].to_string();
        }
        "unknown".to_string()
    }
}

impl StructuralParser for PythonParser {
    fn handles(&self, file_path: &str) -> bool {
        file_path.ends_with(".py")
    }

    fn parse(&self, file_path: &str, source: &str) -> Result<SemanticContext> {
        let mut context = SemanticContext {
            file_path: file_path.to_string(),
            content_hash: content_hash(source),
            ..Default::default()
        };

        let lines: Vec<&str> = source.lines().collect();
        let mut pending_decorators: Vec<String> = Vec::new();
        let mut current_class: Option<(String, usize)> = None;

        let mut index = 0;
        while index < lines.len() {
            let line = lines[index];
            let trimmed = strip_comment(line);
            let trimmed = trimmed.trim();
            if trimmed.is_empty() {
                index += 1;
                continue;
            }

            let indent = Self::indent_of(line);

            // Dedenting to or past the class header ends the class scope.
            if let Some((_, class_indent)) = &current_class {
                if indent <= *class_indent && !trimmed.starts_with('@') {
                    current_class = None;
                }
            }

            if let Some(decorator) = trimmed.strip_prefix('@') {
                pending_decorators.push(decorator.trim().to_string());
                index += 1;
                continue;
            }

            if trimmed.starts_with("def ") || trimmed.starts_with("async def ") {
                let (statement, consumed) = Self::join_statement(&lines, index, file_path)?;
                let decorators = std::mem::take(&mut pending_decorators);
                let signature =
                    Self::parse_signature(statement.trim(), index + 1, decorators, file_path)?;

                match &current_class {
                    Some((class_name, class_indent)) if indent > *class_indent => {
                        context
                            .classes
                            .entry(class_name.clone())
                            .or_insert_with(|| ClassDefinition {
                                name: class_name.clone(),
                                ..Default::default()
                            })
                            .methods
                            .insert(signature.name.clone(), signature);
                    }
                    _ => {
                        context.functions.insert(signature.name.clone(), signature);
                    }
                }
                index += consumed;
                continue;
            }

            if trimmed.starts_with("class ") {
                let (statement, consumed) = Self::join_statement(&lines, index, file_path)?;
                let captures =
                    CLASS_LINE
                        .captures(statement.trim())
                        .ok_or_else(|| PolymergeError::Parse {
                            file: file_path.to_string(),
                            reason: format!("malformed class statement at line {}", index + 1),
                        })?;

                let name = captures[1].to_string();
                let bases: Vec<String> = captures
                    .get(2)
                    .map(|m| {
                        split_top_level(m.as_str())
                            .into_iter()
                            .map(|base| base.trim().to_string())
                            .filter(|base| !base.is_empty() && !base.contains('='))
                            .collect()
                    })
                    .unwrap_or_default();

                context.classes.insert(
                    name.clone(),
                    ClassDefinition {
                        name: name.clone(),
                        bases,
                        decorators: std::mem::take(&mut pending_decorators),
                        line_number: index + 1,
                        ..Default::default()
                    },
                );
                current_class = Some((name, indent));
                index += consumed;
                continue;
            }

            pending_decorators.clear();

            if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
                let (statement, consumed) = Self::join_statement(&lines, index, file_path)?;
                context.imports.extend(Self::parse_imports(statement.trim()));
                index += consumed;
                continue;
            }

            if indent == 0 && current_class.is_none() && !starts_with_keyword(trimmed) {
                if let Some(captures) = ANNOTATED_ASSIGN.captures(trimmed) {
                    let name = captures[1].to_string();
                    let var_type = captures[2].trim().to_string();
                    record_variable(&mut context, name, var_type);
                } else if let Some(captures) = SIMPLE_ASSIGN.captures(trimmed) {
                    let name = captures[1].to_string();
                    let var_type = Self::infer_literal_type(&captures[2]);
                    record_variable(&mut context, name, var_type);
                }
            }

            index += 1;
        }

        Ok(context)
    }
}

/// Coarse regex extraction for sources the structured pass rejects. Catches
/// signatures, classes, and imports; skips defaults/decorator detail.
#[derive(Debug, Default, Clone)]
pub struct RegexParser;

static ANY_DEF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(async\s+)?def\s+([A-Za-z_]\w*)\s*\(([^)]*)\)\s*(?:->\s*([^:\n]+))?:")
        .unwrap()
});
static ANY_CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^class\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:").unwrap());
static ANY_IMPORT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(import\s+[\w.,\s]+|from\s+[\w.]+\s+import\s+[\w.,\s()*]+)").unwrap());

impl RegexParser {
    pub fn new() -> Self {
        Self
    }
}

impl StructuralParser for RegexParser {
    fn handles(&self, file_path: &str) -> bool {
        file_path.ends_with(".py")
    }

    fn parse(&self, file_path: &str, source: &str) -> Result<SemanticContext> {
        let mut context = SemanticContext {
            file_path: file_path.to_string(),
            content_hash: content_hash(source),
            ..Default::default()
        };

        for captures in ANY_DEF.captures_iter(source) {
            let signature = FunctionSignature {
                name: captures[2].to_string(),
                is_async: captures.get(1).is_some(),
                args: split_top_level(&captures[3])
                    .into_iter()
                    .map(|arg| {
                        arg.split('=').next().unwrap_or(&arg).trim().to_string()
                    })
                    .filter(|arg| !arg.is_empty())
                    .collect(),
                return_type: captures.get(4).map(|m| m.as_str().trim().to_string()),
                ..Default::default()
            };
            context.functions.insert(signature.name.clone(), signature);
        }

        for captures in ANY_CLASS.captures_iter(source) {
            let name = captures[1].to_string();
            let bases = captures
                .get(2)
                .map(|m| {
                    split_top_level(m.as_str())
                        .into_iter()
                        .map(|base| base.trim().to_string())
                        .filter(|base| !base.is_empty() && !base.contains('='))
                        .collect()
                })
                .unwrap_or_default();
            context.classes.insert(
                name.clone(),
                ClassDefinition {
                    name,
                    bases,
                    ..Default::default()
                },
            );
        }

        for captures in ANY_IMPORT.captures_iter(source) {
            context
                .imports
                .extend(PythonParser::parse_imports(captures[1].trim()));
        }

        Ok(context)
    }
}

/// Try the primary parser, fall back to the secondary on parse failure.
pub struct FallbackParser {
    primary: Box<dyn StructuralParser>,
    secondary: Box<dyn StructuralParser>,
}

impl FallbackParser {
    pub fn new(primary: Box<dyn StructuralParser>, secondary: Box<dyn StructuralParser>) -> Self {
        Self { primary, secondary }
    }
}

impl StructuralParser for FallbackParser {
    fn handles(&self, file_path: &str) -> bool {
        self.primary.handles(file_path) || self.secondary.handles(file_path)
    }

    fn parse(&self, file_path: &str, source: &str) -> Result<SemanticContext> {
        match self.primary.parse(file_path, source) {
            Ok(context) => Ok(context),
            Err(error) => {
                debug!(file = %file_path, %error, "Primary parser failed, trying fallback");
                self.secondary.parse(file_path, source)
            }
        }
    }
}

fn strip_comment(line: &str) -> &str {
    // Good enough for structure extraction; a '#' inside a string literal
    // only ever truncates a value we were not going to interpret anyway.
    match line.find('#') {
        Some(position) if !in_string_prefix(line, position) => &line[..position],
        _ => line,
    }
}

fn in_string_prefix(line: &str, position: usize) -> bool {
    let prefix = &line[..position];
    prefix.matches('"').count() % 2 == 1 || prefix.matches('\'').count() % 2 == 1
}

fn bracket_delta(code: &str) -> i32 {
    let mut delta = 0;
    for ch in code.chars() {
        match ch {
            '(' | '[' | '{' => delta += 1,
            ')' | ']' | '}' => delta -= 1,
            _ => {}
        }
    }
    delta
}

/// Split on commas that are not nested inside brackets.
fn split_top_level(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth: i32 = 0;
    for ch in text.chars() {
        match ch {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// Split on the first occurrence of `separator` outside brackets.
fn split_once_top_level(text: &str, separator: char) -> Option<(String, String)> {
    let mut depth: i32 = 0;
    for (index, ch) in text.char_indices() {
        match ch {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if ch == separator && depth == 0 => {
                // Skip ==, >=, <=, != when splitting on '='.
                if separator == '=' {
                    let bytes = text.as_bytes();
                    let next = bytes.get(index + 1);
                    let previous = index.checked_sub(1).and_then(|i| bytes.get(i));
                    if next == Some(&b'=')
                        || matches!(previous, Some(&b'=') | Some(&b'!') | Some(&b'<') | Some(&b'>'))
                    {
                        continue;
                    }
                }
                return Some((
                    text[..index].to_string(),
                    text[index + ch.len_utf8()..].to_string(),
                ));
            }
            _ => {}
        }
    }
    None
}

fn bare_name(declaration: &str) -> String {
    declaration
        .split(':')
        .next()
        .unwrap_or(declaration)
        .trim()
        .to_string()
}

fn split_alias(part: &str) -> (String, Option<String>) {
    match part.split_once(" as ") {
        Some((name, alias)) => (name.trim().to_string(), Some(alias.trim().to_string())),
        None => (part.trim().to_string(), None),
    }
}

fn starts_with_keyword(trimmed: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "if", "elif", "else", "for", "while", "try", "except", "finally", "with", "return",
        "raise", "pass", "break", "continue", "assert", "del", "global", "nonlocal", "yield",
        "lambda", "print",
    ];
    let first = trimmed
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or("");
    KEYWORDS.contains(&first)
}

fn record_variable(context: &mut SemanticContext, name: String, var_type: String) {
    let is_constant = name.chars().any(|c| c.is_ascii_alphabetic())
        && !name.chars().any(|c| c.is_ascii_lowercase());
    if is_constant {
        context.constants.insert(name, var_type);
    } else {
        context.global_variables.insert(name, var_type);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
import os
import numpy as np
from collections import OrderedDict, defaultdict as dd

MAX_RETRIES = 3
endpoint = "http://localhost"
window: float = 2.5

@cached
def fetch(url, timeout=30, *, retries=3, **extra) -> Response:
    return None

async def poll(interval):
    pass

class Worker(Base, mixins.Stoppable):
    def run(self, task):
        pass

    def _shutdown(self):
        pass

def standalone():
    pass
"#;

    #[test]
    fn structured_parse_extracts_the_model() {
        let parser = PythonParser::new();
        let context = parser.parse("sample.py", SAMPLE).unwrap();

        let fetch = &context.functions["fetch"];
        assert_eq!(fetch.args, vec!["url", "timeout"]);
        assert_eq!(fetch.defaults, vec!["30"]);
        assert_eq!(fetch.kwonly_args, vec!["retries"]);
        assert_eq!(fetch.kw_defaults["retries"], "3");
        assert_eq!(fetch.kwargs.as_deref(), Some("extra"));
        assert_eq!(fetch.return_type.as_deref(), Some("Response"));
        assert_eq!(fetch.decorators, vec!["cached"]);

        assert!(context.functions["poll"].is_async);
        assert!(context.functions.contains_key("standalone"));

        let worker = &context.classes["Worker"];
        assert_eq!(worker.bases, vec!["Base", "mixins.Stoppable"]);
        assert!(worker.methods.contains_key("run"));
        assert!(worker.methods.contains_key("_shutdown"));
        assert!(!context.functions.contains_key("run"));

        assert_eq!(context.imports.len(), 4);
        assert_eq!(context.imports[1].alias.as_deref(), Some("np"));

        assert_eq!(context.constants["MAX_RETRIES"], "int");
        assert_eq!(context.global_variables["endpoint"], "str");
        assert_eq!(context.global_variables["window"], "float");
    }

    #[test]
    fn multi_line_signature_is_joined() {
        let source = "def configure(\n    host,\n    port=8080,\n) -> None:\n    pass\n";
        let context = PythonParser::new().parse("config.py", source).unwrap();
        let configure = &context.functions["configure"];
        assert_eq!(configure.args, vec!["host", "port"]);
        assert_eq!(configure.defaults, vec!["8080"]);
    }

    #[test]
    fn unbalanced_def_falls_back_to_regex_extraction() {
        let broken = "def broken(a, b:\n    pass\n\ndef fine(x):\n    pass\n";
        assert!(PythonParser::new().parse("broken.py", broken).is_err());

        let context = PythonParser::with_fallback()
            .parse("broken.py", broken)
            .unwrap();
        assert!(context.functions.contains_key("fine"));
    }

    #[test]
    fn identical_content_hashes_match() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
    }
}
