//! Template System - Packaging Metadata
//!
//! Templates bind against the fixed set of names in [`RenderContext`]:
//!
//! - `{{ name }}` substitutes a field; list fields join with `, `.
//! - `{{#each requires}} ... {{/each}}` repeats its body per item, with
//!   `{{ this }}` bound to the item.
//!
//! A newline directly after a block tag is dropped so block tags can sit on
//! their own lines.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::manifest::{Manifest, PackageType};
use crate::PACKAGE_PREFIX;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    MissingTemplate(PathBuf),

    #[error("{template}:{line}: {message}")]
    Syntax {
        template: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{template}:{line}: unknown field '{field}'")]
    UnknownField {
        template: PathBuf,
        line: usize,
        field: String,
    },

    #[error("{template}:{line}: field '{field}' is not a list")]
    NotAList {
        template: PathBuf,
        line: usize,
        field: String,
    },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a template may reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderContext {
    pub name: String,
    pub display: String,
    pub description: String,
    pub pkg: String,
    pub version: String,
    pub package_type: PackageType,
    pub requires: Vec<String>,
}

impl RenderContext {
    /// Every name [`lookup`](Self::lookup) resolves.
    pub const FIELDS: &'static [&'static str] = &[
        "name",
        "display",
        "description",
        "pkg",
        "version",
        "package_type",
        "requires",
    ];
    /// The subset of [`FIELDS`](Self::FIELDS) that `{{#each}}` can iterate.
    pub const LIST_FIELDS: &'static [&'static str] = &["requires"];

    pub fn new(manifest: &Manifest, package_type: PackageType, requires: Vec<String>) -> Self {
        Self {
            name: manifest.name.clone(),
            display: manifest.display.clone(),
            description: manifest
                .description
                .clone()
                .unwrap_or_else(|| manifest.display.clone()),
            pkg: format!("{PACKAGE_PREFIX}{}", manifest.name),
            version: manifest.version.clone(),
            package_type,
            requires,
        }
    }

    pub fn lookup(&self, field: &str) -> Option<Field<'_>> {
        Some(match field {
            "name" => Field::Scalar(&self.name),
            "display" => Field::Scalar(&self.display),
            "description" => Field::Scalar(&self.description),
            "pkg" => Field::Scalar(&self.pkg),
            "version" => Field::Scalar(&self.version),
            "package_type" => Field::Scalar(self.package_type.as_str()),
            "requires" => Field::List(&self.requires),
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Field<'a> {
    Scalar(&'a str),
    List(&'a [String]),
}

/// A rendered file and the template it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedArtifact {
    pub template: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Field { name: String, line: usize },
    Each { name: String, line: usize, body: Vec<Node> },
}

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    path: PathBuf,
    nodes: Vec<Node>,
}

impl Template {
    pub fn load(path: &Path) -> Result<Self, TemplateError> {
        if !path.is_file() {
            return Err(TemplateError::MissingTemplate(path.to_path_buf()));
        }
        let source = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &source)
    }

    /// Parse `source`; `path` is only used in error messages.
    pub fn parse(path: &Path, source: &str) -> Result<Self, TemplateError> {
        let mut parser = Parser {
            path,
            rest: source,
            line: 1,
        };
        let nodes = parser.nodes(None)?;
        Ok(Self {
            path: path.to_path_buf(),
            nodes,
        })
    }

    pub fn render(&self, context: &RenderContext) -> Result<String, TemplateError> {
        let mut out = String::new();
        self.render_nodes(&self.nodes, context, None, &mut out)?;
        Ok(out)
    }

    fn render_nodes(
        &self,
        nodes: &[Node],
        context: &RenderContext,
        item: Option<&str>,
        out: &mut String,
    ) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Field { name, line } => match (name.as_str(), item) {
                    ("this", Some(item)) => out.push_str(item),
                    _ => match context.lookup(name) {
                        Some(Field::Scalar(value)) => out.push_str(value),
                        Some(Field::List(values)) => out.push_str(&values.join(", ")),
                        None => return Err(self.unknown(name, *line)),
                    },
                },
                Node::Each { name, line, body } => match context.lookup(name) {
                    Some(Field::List(values)) => {
                        for value in values {
                            self.render_nodes(body, context, Some(value), out)?;
                        }
                    }
                    Some(Field::Scalar(_)) => {
                        return Err(TemplateError::NotAList {
                            template: self.path.clone(),
                            line: *line,
                            field: name.clone(),
                        })
                    }
                    None => return Err(self.unknown(name, *line)),
                },
            }
        }
        Ok(())
    }

    fn unknown(&self, field: &str, line: usize) -> TemplateError {
        TemplateError::UnknownField {
            template: self.path.clone(),
            line,
            field: field.to_string(),
        }
    }
}

struct Parser<'a> {
    path: &'a Path,
    rest: &'a str,
    line: usize,
}

impl<'a> Parser<'a> {
    fn unknown(&self, line: usize, field: &str) -> TemplateError {
        TemplateError::UnknownField {
            template: self.path.to_path_buf(),
            line,
            field: field.to_string(),
        }
    }

    fn syntax(&self, line: usize, message: impl Into<String>) -> TemplateError {
        TemplateError::Syntax {
            template: self.path.to_path_buf(),
            line,
            message: message.into(),
        }
    }

    fn advance(&mut self, len: usize) -> &'a str {
        let (taken, rest) = self.rest.split_at(len);
        self.line += taken.matches('\n').count();
        self.rest = rest;
        taken
    }

    fn skip_newline(&mut self) {
        if self.rest.starts_with("\r\n") {
            self.advance(2);
        } else if self.rest.starts_with('\n') {
            self.advance(1);
        }
    }

    /// Parse until end of input, or until `{{/each}}` when inside a block
    /// opened on line `open`.
    fn nodes(&mut self, open: Option<usize>) -> Result<Vec<Node>, TemplateError> {
        let mut nodes = Vec::new();
        loop {
            let Some(start) = self.rest.find("{{") else {
                if !self.rest.is_empty() {
                    let text = self.advance(self.rest.len());
                    nodes.push(Node::Text(text.to_string()));
                }
                return match open {
                    Some(line) => Err(self.syntax(line, "unclosed {{#each}} block")),
                    None => Ok(nodes),
                };
            };
            if start > 0 {
                let text = self.advance(start);
                nodes.push(Node::Text(text.to_string()));
            }

            let line = self.line;
            let Some(end) = self.rest.find("}}") else {
                return Err(self.syntax(line, "unterminated tag"));
            };
            let tag = self.advance(end + 2);
            let inner = tag[2..tag.len() - 2].trim();

            if let Some(target) = inner.strip_prefix("#each") {
                let name = target.trim();
                if !is_identifier(name) {
                    return Err(self.syntax(line, format!("bad block target '{name}'")));
                }
                if !RenderContext::FIELDS.contains(&name) {
                    return Err(self.unknown(line, name));
                }
                if !RenderContext::LIST_FIELDS.contains(&name) {
                    return Err(TemplateError::NotAList {
                        template: self.path.to_path_buf(),
                        line,
                        field: name.to_string(),
                    });
                }
                self.skip_newline();
                let body = self.nodes(Some(line))?;
                nodes.push(Node::Each {
                    name: name.to_string(),
                    line,
                    body,
                });
            } else if inner == "/each" {
                if open.is_none() {
                    return Err(self.syntax(line, "{{/each}} without matching {{#each}}"));
                }
                self.skip_newline();
                return Ok(nodes);
            } else if is_identifier(inner) {
                let bound_item = inner == "this" && open.is_some();
                if !bound_item && !RenderContext::FIELDS.contains(&inner) {
                    return Err(self.unknown(line, inner));
                }
                nodes.push(Node::Field {
                    name: inner.to_string(),
                    line,
                });
            } else {
                return Err(self.syntax(line, format!("bad tag '{inner}'")));
            }
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Load and render one template.
pub fn render(template_path: &Path, context: &RenderContext) -> Result<String, TemplateError> {
    Template::load(template_path)?.render(context)
}

/// Render `template_path` into `output` with one trailing newline,
/// replacing any existing file. Nothing is written when rendering fails.
pub fn render_to(
    template_path: &Path,
    context: &RenderContext,
    output: &Path,
) -> Result<RenderedArtifact, TemplateError> {
    let mut artifacts = render_all(&[(template_path.to_path_buf(), output.to_path_buf())], context)?;
    Ok(artifacts.remove(0))
}

/// Render every `(template, output)` pair before writing any of them, so a
/// bad template leaves all outputs untouched.
pub fn render_all(
    pairs: &[(PathBuf, PathBuf)],
    context: &RenderContext,
) -> Result<Vec<RenderedArtifact>, TemplateError> {
    let mut rendered = Vec::with_capacity(pairs.len());
    for (template, output) in pairs {
        rendered.push((template, output, render(template, context)?));
    }

    let mut artifacts = Vec::with_capacity(rendered.len());
    for (template, output, mut text) in rendered {
        text.push('\n');
        fs::write(output, text).map_err(|source| TemplateError::Io {
            path: output.clone(),
            source,
        })?;
        artifacts.push(RenderedArtifact {
            template: template.clone(),
            output: output.clone(),
        });
    }
    Ok(artifacts)
}
