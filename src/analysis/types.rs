use std::collections::BTreeMap;

/// Symbol visibility derived from naming convention: leading/trailing
/// underscores in the Python style.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
    Private,
    Magic,
}

impl Visibility {
    pub fn of(name: &str) -> Self {
        if name.starts_with("__") && name.ends_with("__") {
            Visibility::Magic
        } else if name.starts_with("__") {
            Visibility::Private
        } else if name.starts_with('_') {
            Visibility::Protected
        } else {
            Visibility::Public
        }
    }

    pub fn is_public(self) -> bool {
        matches!(self, Visibility::Public)
    }
}

/// Parsed function signature. Argument entries keep their annotation
/// (`"name: Type"`) so textual comparison catches type drift.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub is_async: bool,
    pub args: Vec<String>,
    pub defaults: Vec<String>,
    pub kwonly_args: Vec<String>,
    pub kw_defaults: BTreeMap<String, String>,
    pub varargs: Option<String>,
    pub kwargs: Option<String>,
    pub return_type: Option<String>,
    pub decorators: Vec<String>,
    pub line_number: usize,
}

impl FunctionSignature {
    pub fn visibility(&self) -> Visibility {
        Visibility::of(&self.name)
    }

    /// Render back to a `def` line, defaults and star-args included.
    pub fn render(&self) -> String {
        let mut parts: Vec<String> = self.args.clone();

        // Defaults attach to the trailing positional arguments.
        let offset = parts.len().saturating_sub(self.defaults.len());
        for (i, default) in self.defaults.iter().enumerate() {
            if let Some(arg) = parts.get_mut(offset + i) {
                *arg = format!("{arg}={default}");
            }
        }

        if let Some(varargs) = &self.varargs {
            parts.push(format!("*{varargs}"));
        } else if !self.kwonly_args.is_empty() {
            parts.push("*".to_string());
        }

        for kwonly in &self.kwonly_args {
            let bare = kwonly.split(':').next().unwrap_or(kwonly).trim();
            match self.kw_defaults.get(bare) {
                Some(default) => parts.push(format!("{kwonly}={default}")),
                None => parts.push(kwonly.clone()),
            }
        }

        if let Some(kwargs) = &self.kwargs {
            parts.push(format!("**{kwargs}"));
        }

        let prefix = if self.is_async { "async def" } else { "def" };
        let mut rendered = format!("{prefix} {}({})", self.name, parts.join(", "));
        if let Some(return_type) = &self.return_type {
            rendered.push_str(&format!(" -> {return_type}"));
        }
        rendered
    }
}

/// Parsed class definition with its method signatures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassDefinition {
    pub name: String,
    pub bases: Vec<String>,
    pub methods: BTreeMap<String, FunctionSignature>,
    pub decorators: Vec<String>,
    pub line_number: usize,
}

impl ClassDefinition {
    pub fn visibility(&self) -> Visibility {
        Visibility::of(&self.name)
    }
}

/// One import binding.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImportInfo {
    pub module: String,
    /// Imported member for `from` imports
    pub name: Option<String>,
    pub alias: Option<String>,
}

impl ImportInfo {
    /// The name this import binds in the module namespace.
    pub fn bound_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        if let Some(name) = &self.name {
            return name.clone();
        }
        self.module
            .split('.')
            .next_back()
            .unwrap_or(&self.module)
            .to_string()
    }

    /// Render back to an import statement.
    pub fn render(&self) -> String {
        let mut rendered = match &self.name {
            Some(name) => format!("from {} import {name}", self.module),
            None => format!("import {}", self.module),
        };
        if let Some(alias) = &self.alias {
            rendered.push_str(&format!(" as {alias}"));
        }
        rendered
    }
}

/// Complete structural context of one source file on one branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticContext {
    pub file_path: String,
    pub functions: BTreeMap<String, FunctionSignature>,
    pub classes: BTreeMap<String, ClassDefinition>,
    pub imports: Vec<ImportInfo>,
    pub global_variables: BTreeMap<String, String>,
    pub constants: BTreeMap<String, String>,
    pub content_hash: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_from_underscores() {
        assert_eq!(Visibility::of("handler"), Visibility::Public);
        assert_eq!(Visibility::of("_helper"), Visibility::Protected);
        assert_eq!(Visibility::of("__secret"), Visibility::Private);
        assert_eq!(Visibility::of("__init__"), Visibility::Magic);
    }

    #[test]
    fn signature_renders_defaults_and_stars() {
        let mut kw_defaults = BTreeMap::new();
        kw_defaults.insert("retries".to_string(), "3".to_string());

        let signature = FunctionSignature {
            name: "fetch".to_string(),
            args: vec!["url".to_string(), "timeout".to_string()],
            defaults: vec!["30".to_string()],
            kwonly_args: vec!["retries".to_string()],
            kw_defaults,
            kwargs: Some("extra".to_string()),
            return_type: Some("Response".to_string()),
            ..Default::default()
        };

        assert_eq!(
            signature.render(),
            "def fetch(url, timeout=30, *, retries=3, **extra) -> Response"
        );
    }

    #[test]
    fn import_bound_name_prefers_alias() {
        let plain = ImportInfo {
            module: "os.path".to_string(),
            ..Default::default()
        };
        let aliased = ImportInfo {
            module: "numpy".to_string(),
            alias: Some("np".to_string()),
            ..Default::default()
        };
        let member = ImportInfo {
            module: "collections".to_string(),
            name: Some("OrderedDict".to_string()),
            ..Default::default()
        };
        assert_eq!(plain.bound_name(), "path");
        assert_eq!(aliased.bound_name(), "np");
        assert_eq!(member.bound_name(), "OrderedDict");
        assert_eq!(member.render(), "from collections import OrderedDict");
    }
}
