use minijinja::Environment;

use crate::report::REPORT_TEMPLATE;

/// Templates are compiled into the binary; `.html` names are autoescaped.
pub fn init_templates() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();

    env.add_template(REPORT_TEMPLATE, include_str!("../../templates/report.html"))?;

    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_template_is_registered() {
        let env = init_templates().unwrap();

        assert!(env.get_template(REPORT_TEMPLATE).is_ok());
    }
}
