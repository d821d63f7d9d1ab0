//! Minijinja template environment for the pages served to the user agent.
//!
//! Templates are compiled into the binary. Names ending in `.html` are autoescaped.

use minijinja::Environment;
use serde::Serialize;

/// Auto-submitting form that delivers a `form_post` authorization response
pub const FORM_POST_TEMPLATE: &str = "form_post.html";

/// Build the template environment with every embedded template registered
pub fn build_env() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(
        FORM_POST_TEMPLATE,
        include_str!("../templates/form_post.html"),
    )?;
    Ok(env)
}

/// Hidden input of the `form_post` page
#[derive(Debug, Serialize)]
pub struct FormParam<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// Template context for [`FORM_POST_TEMPLATE`]
#[derive(Debug, Serialize)]
pub struct FormPostContext<'a> {
    pub action: &'a str,
    pub params: Vec<FormParam<'a>>,
}

impl<'a> FormPostContext<'a> {
    pub fn new(action: &'a str, params: &'a [(String, String)]) -> Self {
        Self {
            action,
            params: params
                .iter()
                .map(|(name, value)| FormParam { name, value })
                .collect(),
        }
    }
}
