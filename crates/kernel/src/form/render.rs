//! HTML rendering of forms with Tera templates.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tera::Tera;
use tracing::debug;

use super::types::{FieldMessage, FormField};

/// Security token as rendered into the form.
#[derive(Debug, Clone, Serialize)]
pub struct TokenView {
    pub name: String,
    pub value: String,
}

/// Everything a renderer needs to draw a form.
#[derive(Debug, Serialize)]
pub struct FormView<'a> {
    pub name: &'a str,
    pub action: &'a str,
    /// `method` attribute of the `<form>` tag: `get` or `post`.
    pub method: &'a str,
    /// Method carried in a hidden `_method` field when the form's method
    /// isn't GET or POST.
    pub method_override: Option<&'a str>,
    pub message: Option<&'a FieldMessage>,
    pub fields: &'a [FormField],
    pub actions: &'a [FormField],
    pub token: Option<TokenView>,
}

/// Turns a [`FormView`] into markup.
pub trait FormRenderer: Send + Sync {
    fn render(&self, view: &FormView<'_>) -> Result<String>;
}

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("form/form.html", include_str!("../../templates/form/form.html")),
    ("form/message.html", include_str!("../../templates/form/message.html")),
    ("form/textfield.html", include_str!("../../templates/form/textfield.html")),
    ("form/textarea.html", include_str!("../../templates/form/textarea.html")),
    ("form/select.html", include_str!("../../templates/form/select.html")),
    ("form/checkbox.html", include_str!("../../templates/form/checkbox.html")),
    ("form/checkboxes.html", include_str!("../../templates/form/checkboxes.html")),
    ("form/radio.html", include_str!("../../templates/form/radio.html")),
    ("form/hidden.html", include_str!("../../templates/form/hidden.html")),
    ("form/password.html", include_str!("../../templates/form/password.html")),
    ("form/action.html", include_str!("../../templates/form/action.html")),
    ("form/fieldset.html", include_str!("../../templates/form/fieldset.html")),
    ("form/markup.html", include_str!("../../templates/form/markup.html")),
    ("form/container.html", include_str!("../../templates/form/container.html")),
];

/// Tera-backed renderer. Each field kind has a `form/<kind>.html` template.
pub struct TeraFormRenderer {
    tera: Tera,
}

impl TeraFormRenderer {
    /// Renderer using the built-in templates.
    pub fn new() -> Result<Self> {
        Ok(Self {
            tera: builtin_tera()?,
        })
    }

    /// Renderer using templates from `template_dir`, falling back to the
    /// built-in ones for anything the directory does not define.
    pub fn from_dir(template_dir: &Path) -> Result<Self> {
        let pattern = template_dir.join("**/*.html");
        let pattern_str = pattern
            .to_str()
            .context("invalid template directory path")?;

        let mut tera = Tera::new(pattern_str).context("failed to initialize Tera templates")?;
        tera.extend(&builtin_tera()?)
            .context("failed to merge built-in form templates")?;

        let template_names: Vec<_> = tera.get_template_names().collect();
        debug!(count = template_names.len(), "loaded form templates");

        Ok(Self { tera })
    }

    fn render_fields(
        &self,
        form_name: &str,
        fields: &[FormField],
        html: &mut String,
    ) -> Result<()> {
        for field in fields {
            let rendered = self.render_field(form_name, field)?;
            html.push_str(&rendered);
            html.push('\n');
        }
        Ok(())
    }

    fn render_field(&self, form_name: &str, field: &FormField) -> Result<String> {
        // Render children first, then the wrapper template
        let mut children = String::new();
        self.render_fields(form_name, &field.children, &mut children)?;

        let mut context = tera::Context::new();
        context.insert("form_name", form_name);
        context.insert("field", field);
        context.insert("children", &children);

        let template = format!("form/{}.html", field.kind.type_name());
        self.tera
            .render(&template, &context)
            .with_context(|| format!("failed to render form field: {}", field.name))
    }
}

impl FormRenderer for TeraFormRenderer {
    fn render(&self, view: &FormView<'_>) -> Result<String> {
        let mut elements = String::new();
        self.render_fields(view.name, view.fields, &mut elements)?;

        let mut actions = String::new();
        self.render_fields(view.name, view.actions, &mut actions)?;

        let mut context = tera::Context::new();
        context.insert("form", view);
        context.insert("elements", &elements);
        context.insert("actions", &actions);

        self.tera
            .render("form/form.html", &context)
            .context("failed to render form template")
    }
}

fn builtin_tera() -> Result<Tera> {
    let mut tera = Tera::default();
    tera.add_raw_templates(BUILTIN_TEMPLATES.iter().copied())
        .context("failed to register built-in form templates")?;
    Ok(tera)
}
