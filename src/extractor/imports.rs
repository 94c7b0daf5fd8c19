//! Import alias tracking for PHP `use` declarations.
//!
//! Handles the class-import forms that matter for resolving attribute names:
//! - Simple: `use PHPUnit\Framework\Attributes\Test;`
//! - Aliased: `use PHPUnit\Framework\Attributes\Test as IsTest;`
//! - Multiple: `use A\B, C\D as E;`
//! - Grouped: `use PHPUnit\Framework\Attributes\{Test, Group as Tag};`
//!
//! `use function` and `use const` imports never name classes and are skipped.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    aliases: HashMap<String, String>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self {
            aliases: HashMap::new(),
        }
    }

    pub fn insert(&mut self, alias: String, full_name: String) {
        self.aliases.insert(alias.to_lowercase(), full_name);
    }

    /// Aliases are case-insensitive in PHP.
    pub fn get(&self, alias: &str) -> Option<&String> {
        self.aliases.get(&alias.to_lowercase())
    }

    pub fn clear(&mut self) {
        self.aliases.clear();
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Records every alias introduced by the text of one `use` declaration.
    pub fn add_declaration(&mut self, text: &str) {
        let body = text.trim().trim_end_matches(';').trim();
        let Some(body) = strip_keyword(body, "use") else {
            return;
        };
        if strip_keyword(body, "function").is_some() || strip_keyword(body, "const").is_some() {
            return;
        }

        match (body.find('{'), body.rfind('}')) {
            (Some(open), Some(close)) if open < close => {
                let prefix = body[..open].trim().trim_matches('\\');
                for clause in body[open + 1..close].split(',') {
                    self.add_clause(prefix, clause);
                }
            }
            _ => {
                for clause in body.split(',') {
                    self.add_clause("", clause);
                }
            }
        }
    }

    fn add_clause(&mut self, prefix: &str, clause: &str) {
        let tokens: Vec<&str> = clause.split_whitespace().collect();
        let (name, alias) = match tokens.as_slice() {
            [name] => (*name, None),
            [name, keyword, alias] if keyword.eq_ignore_ascii_case("as") => (*name, Some(*alias)),
            _ => return,
        };

        let name = name.trim_start_matches('\\');
        if name.is_empty() {
            return;
        }
        let full_name = if prefix.is_empty() {
            name.to_string()
        } else {
            format!("{prefix}\\{name}")
        };
        let alias = alias
            .map(str::to_string)
            .unwrap_or_else(|| crate::utils::last_segment(&full_name).to_string());
        self.insert(alias, full_name);
    }

    /// Resolves a class reference the way PHP does at compile time.
    pub fn resolve(&self, name: &str, namespace: Option<&str>) -> String {
        if let Some(fully_qualified) = name.strip_prefix('\\') {
            return fully_qualified.to_string();
        }
        if let Some(relative) = strip_keyword_segment(name, "namespace") {
            return qualify(namespace, relative);
        }

        let (head, rest) = match name.split_once('\\') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name, None),
        };
        if let Some(target) = self.get(head) {
            return match rest {
                Some(rest) => format!("{target}\\{rest}"),
                None => target.clone(),
            };
        }
        qualify(namespace, name)
    }
}

fn qualify(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}\\{name}"),
        _ => name.to_string(),
    }
}

fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let head = text.get(..keyword.len())?;
    let rest = &text[keyword.len()..];
    if head.eq_ignore_ascii_case(keyword) && rest.starts_with(char::is_whitespace) {
        Some(rest.trim_start())
    } else {
        None
    }
}

fn strip_keyword_segment<'a>(name: &'a str, keyword: &str) -> Option<&'a str> {
    let (head, rest) = name.split_once('\\')?;
    head.eq_ignore_ascii_case(keyword).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_use() {
        let mut aliases = AliasTable::new();
        aliases.add_declaration("use PHPUnit\\Framework\\Attributes\\Test;");

        assert_eq!(aliases.len(), 1);
        assert_eq!(
            aliases.get("Test"),
            Some(&"PHPUnit\\Framework\\Attributes\\Test".to_string())
        );
    }

    #[test]
    fn test_aliased_and_multiple_use() {
        let mut aliases = AliasTable::new();
        aliases.add_declaration("use \\PHPUnit\\Framework\\Attributes\\Test as IsTest, App\\Foo;");

        assert_eq!(
            aliases.get("istest"),
            Some(&"PHPUnit\\Framework\\Attributes\\Test".to_string())
        );
        assert_eq!(aliases.get("Foo"), Some(&"App\\Foo".to_string()));
    }

    #[test]
    fn test_group_use() {
        let mut aliases = AliasTable::new();
        aliases.add_declaration("use PHPUnit\\Framework\\Attributes\\{Test, Group as Tag};");

        assert_eq!(
            aliases.get("Test"),
            Some(&"PHPUnit\\Framework\\Attributes\\Test".to_string())
        );
        assert_eq!(
            aliases.get("Tag"),
            Some(&"PHPUnit\\Framework\\Attributes\\Group".to_string())
        );
    }

    #[test]
    fn test_function_and_const_use_are_ignored() {
        let mut aliases = AliasTable::new();
        aliases.add_declaration("use function App\\helper;");
        aliases.add_declaration("use const App\\VERSION;");
        assert!(aliases.is_empty());
    }

    #[test]
    fn test_resolve() {
        let mut aliases = AliasTable::new();
        aliases.add_declaration("use PHPUnit\\Framework\\Attributes as A;");

        assert_eq!(
            aliases.resolve("A\\Test", Some("App")),
            "PHPUnit\\Framework\\Attributes\\Test"
        );
        assert_eq!(aliases.resolve("\\Foo\\Bar", Some("App")), "Foo\\Bar");
        assert_eq!(aliases.resolve("Test", Some("App\\Tests")), "App\\Tests\\Test");
        assert_eq!(aliases.resolve("namespace\\Test", Some("App")), "App\\Test");
        assert_eq!(aliases.resolve("Test", None), "Test");
    }
}
