use dmig_core::Record;
use minijinja::Environment;

/// A destination query template, parsed once per migration invocation and
/// rendered once per record.
///
/// Rendering is a pure function of the template source and the record:
/// absent fields render empty (use the `default` filter for explicit
/// fallbacks), and the only nondeterministic helper is `uuid4()`, which a
/// template opts into.
pub struct QueryTemplate {
    env: Environment<'static>,
}

const TEMPLATE_NAME: &str = "destination_query";

fn build_environment() -> Environment<'static> {
    let mut env = Environment::new();
    minijinja_contrib::add_to_environment(&mut env);

    // Single quotes double inside SQL string literals.
    env.add_filter("sqlquote", |value: String| value.replace('\'', "''"));
    env.add_function("uuid4", || uuid::Uuid::new_v4().to_string());

    env
}

impl QueryTemplate {
    pub fn compile(source: &str) -> Result<Self, minijinja::Error> {
        let mut env = build_environment();
        env.add_template_owned(TEMPLATE_NAME.to_string(), source.to_string())?;
        Ok(Self { env })
    }

    pub fn render(&self, record: &Record) -> Result<String, minijinja::Error> {
        self.env.get_template(TEMPLATE_NAME)?.render(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        let mut record = Record::new();
        for (column, value) in pairs {
            record.set(*column, *value);
        }
        record
    }

    #[test]
    fn fields_render_by_column_name() {
        let template = QueryTemplate::compile(
            "INSERT INTO people (id, name) VALUES ('{{ id }}', '{{ name }}')",
        )
        .unwrap();

        let rendered = template
            .render(&record(&[("id", "1"), ("name", "Alice")]))
            .unwrap();
        assert_eq!(
            rendered,
            "INSERT INTO people (id, name) VALUES ('1', 'Alice')"
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let template = QueryTemplate::compile("{{ name | upper }}-{{ id }}").unwrap();
        let r = record(&[("id", "9"), ("name", "ada")]);

        let first = template.render(&r).unwrap();
        let second = template.render(&r).unwrap();
        assert_eq!(first, "ADA-9");
        assert_eq!(first, second);
    }

    #[test]
    fn sqlquote_doubles_single_quotes() {
        let template = QueryTemplate::compile("'{{ name | sqlquote }}'").unwrap();
        let rendered = template.render(&record(&[("name", "O'Brien")])).unwrap();
        assert_eq!(rendered, "'O''Brien'");
    }

    #[test]
    fn absent_fields_render_empty_and_default_fills_them() {
        let template = QueryTemplate::compile("[{{ missing }}]").unwrap();
        assert_eq!(template.render(&record(&[])).unwrap(), "[]");

        let template = QueryTemplate::compile("{{ missing | default('n/a') }}").unwrap();
        assert_eq!(template.render(&record(&[])).unwrap(), "n/a");
    }

    #[test]
    fn bad_syntax_fails_at_compile_time() {
        assert!(QueryTemplate::compile("{{ unclosed").is_err());
    }

    #[test]
    fn uuid4_renders_a_v4_uuid() {
        let template = QueryTemplate::compile("{{ uuid4() }}").unwrap();
        let rendered = template.render(&record(&[])).unwrap();
        assert_eq!(rendered.len(), 36);
        assert_eq!(rendered.matches('-').count(), 4);
    }
}
