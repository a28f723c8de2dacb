//! Accessible locators and their Playwright rendering

use serde::{Deserialize, Serialize};
use std::fmt;

/// A reference to a DOM element, resolved by accessibility attributes
/// rather than document structure.
///
/// In YAML the variant is picked by its key:
///
/// ```yaml
/// target: { role: heading, name: Dashboard }
/// target: { label: "Senha *", exact: true }
/// target: { placeholder: "voce@exemplo.com" }
/// target: { text: "Motoristas Disponíveis" }
/// target: { css: 'div[role="status"]' }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Locator {
    Role {
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default)]
        exact: bool,
    },
    Label {
        label: String,
        #[serde(default)]
        exact: bool,
    },
    Placeholder {
        placeholder: String,
        #[serde(default)]
        exact: bool,
    },
    Text {
        text: String,
        #[serde(default)]
        exact: bool,
    },
    Css {
        css: String,
    },
}

impl Locator {
    pub fn role(role: &str, name: &str) -> Self {
        Locator::Role {
            role: role.to_string(),
            name: Some(name.to_string()),
            exact: false,
        }
    }

    pub fn heading(name: &str) -> Self {
        Self::role("heading", name)
    }

    pub fn button(name: &str) -> Self {
        Self::role("button", name)
    }

    pub fn label(text: &str) -> Self {
        Locator::Label {
            label: text.to_string(),
            exact: false,
        }
    }

    pub fn exact_label(text: &str) -> Self {
        Locator::Label {
            label: text.to_string(),
            exact: true,
        }
    }

    pub fn placeholder(text: &str) -> Self {
        Locator::Placeholder {
            placeholder: text.to_string(),
            exact: false,
        }
    }

    pub fn text(text: &str) -> Self {
        Locator::Text {
            text: text.to_string(),
            exact: false,
        }
    }

    pub fn css(selector: &str) -> Self {
        Locator::Css {
            css: selector.to_string(),
        }
    }

    /// Render as a Playwright locator expression rooted at `page`.
    pub fn to_js(&self) -> String {
        match self {
            Locator::Role { role, name, exact } => match name {
                Some(name) => format!(
                    "page.getByRole({}, {{ name: {}, exact: {} }})",
                    js_string(role),
                    js_string(name),
                    exact
                ),
                None => format!("page.getByRole({})", js_string(role)),
            },
            Locator::Label { label, exact } => {
                format!("page.getByLabel({}, {{ exact: {} }})", js_string(label), exact)
            }
            Locator::Placeholder { placeholder, exact } => format!(
                "page.getByPlaceholder({}, {{ exact: {} }})",
                js_string(placeholder),
                exact
            ),
            Locator::Text { text, exact } => {
                format!("page.getByText({}, {{ exact: {} }})", js_string(text), exact)
            }
            Locator::Css { css } => format!("page.locator({})", js_string(css)),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Locator::Role { role, .. } => role.trim().is_empty(),
            Locator::Label { label, .. } => label.trim().is_empty(),
            Locator::Placeholder { placeholder, .. } => placeholder.trim().is_empty(),
            Locator::Text { text, .. } => text.trim().is_empty(),
            Locator::Css { css } => css.trim().is_empty(),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Role { role, name: Some(name), .. } => write!(f, "{} \"{}\"", role, name),
            Locator::Role { role, name: None, .. } => write!(f, "{}", role),
            Locator::Label { label, .. } => write!(f, "label \"{}\"", label),
            Locator::Placeholder { placeholder, .. } => {
                write!(f, "placeholder \"{}\"", placeholder)
            }
            Locator::Text { text, .. } => write!(f, "text \"{}\"", text),
            Locator::Css { css } => write!(f, "css `{}`", css),
        }
    }
}

/// Quote a value as a JavaScript string literal.
///
/// JSON string syntax is a subset of JS string syntax, so this handles
/// quotes, backslashes and non-ASCII text such as "Agência".
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_locator_js() {
        let loc = Locator::heading("Bem-vindo ao Portal da Agência");
        assert_eq!(
            loc.to_js(),
            r#"page.getByRole("heading", { name: "Bem-vindo ao Portal da Agência", exact: false })"#
        );
    }

    #[test]
    fn test_exact_label_js() {
        assert_eq!(
            Locator::exact_label("Senha *").to_js(),
            r#"page.getByLabel("Senha *", { exact: true })"#
        );
    }

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string(r#"it's "quoted""#), r#""it's \"quoted\"""#);
        assert_eq!(js_string("a\\b\nc"), r#""a\\b\nc""#);
    }

    #[test]
    fn test_css_locator_keeps_selector_intact() {
        let loc = Locator::css(r#"h1:has-text("Acesse sua conta")"#);
        assert_eq!(loc.to_js(), r#"page.locator("h1:has-text(\"Acesse sua conta\")")"#);
    }

    #[test]
    fn test_untagged_yaml_variants() {
        let role: Locator = serde_yaml::from_str("{ role: heading, name: Dashboard }").unwrap();
        assert_eq!(role, Locator::heading("Dashboard"));

        let label: Locator = serde_yaml::from_str("{ label: 'Senha *', exact: true }").unwrap();
        assert_eq!(label, Locator::exact_label("Senha *"));

        let css: Locator = serde_yaml::from_str("{ css: form }").unwrap();
        assert_eq!(css, Locator::css("form"));
    }

    #[test]
    fn test_display() {
        assert_eq!(Locator::button("Criar Conta").to_string(), "button \"Criar Conta\"");
        assert_eq!(Locator::label("Email").to_string(), "label \"Email\"");
    }
}
