use nacl_model::{
    Element, InstanceElement, ObjectType, PrimitiveType, Value, Variable,
};
use std::fmt::Write;

/// Serializer converts elements back to NaCl source.
///
/// The output is canonical rather than lossless: block entries come out
/// in stored order with two-space indentation. Re-parsing serialized
/// output yields structurally equal elements.
pub struct Serializer {
    indent_level: usize,
}

/// Serialize a file's worth of elements
pub fn serialize(elements: &[&Element]) -> String {
    Serializer::new().serialize_elements(elements)
}

impl Serializer {
    pub fn new() -> Self {
        Self { indent_level: 0 }
    }

    pub fn serialize_elements(&mut self, elements: &[&Element]) -> String {
        let mut output = String::new();
        let mut variables = Vec::new();

        for element in elements {
            match element {
                Element::Object(object) => {
                    self.serialize_object(object, &mut output);
                    output.push('\n');
                }
                Element::Primitive(primitive) => {
                    self.serialize_primitive(primitive, &mut output);
                    output.push('\n');
                }
                Element::Instance(instance) => {
                    self.serialize_instance(instance, &mut output);
                    output.push('\n');
                }
                Element::Variable(variable) => variables.push(variable),
            }
        }

        if !variables.is_empty() {
            self.serialize_vars(&variables, &mut output);
            output.push('\n');
        }
        output
    }

    fn serialize_object(&mut self, object: &ObjectType, output: &mut String) {
        let keyword = if object.is_settings { "settings" } else { "type" };
        let _ = writeln!(
            output,
            "{} {}.{} {{",
            keyword,
            object.elem_id.adapter(),
            object.elem_id.type_name()
        );
        self.indent_level += 1;

        for (key, value) in &object.annotations {
            self.write_attr(key, value, output);
        }

        if !object.annotation_types.is_empty() {
            self.write_indent(output);
            output.push_str("annotations {\n");
            self.indent_level += 1;
            for (name, type_ref) in &object.annotation_types {
                self.write_indent(output);
                let _ = writeln!(output, "{} {} {{}}", type_ref, name);
            }
            self.indent_level -= 1;
            self.write_indent(output);
            output.push_str("}\n");
        }

        for (name, field) in &object.fields {
            self.write_indent(output);
            if field.annotations.is_empty() {
                let _ = writeln!(output, "{} {} {{}}", field.type_ref, name);
            } else {
                let _ = writeln!(output, "{} {} {{", field.type_ref, name);
                self.indent_level += 1;
                for (key, value) in &field.annotations {
                    self.write_attr(key, value, output);
                }
                self.indent_level -= 1;
                self.write_indent(output);
                output.push_str("}\n");
            }
        }

        self.indent_level -= 1;
        output.push_str("}\n");
    }

    fn serialize_primitive(&mut self, primitive: &PrimitiveType, output: &mut String) {
        let _ = writeln!(
            output,
            "type {}.{} is {} {{",
            primitive.elem_id.adapter(),
            primitive.elem_id.type_name(),
            primitive.kind.name()
        );
        self.indent_level += 1;
        for (key, value) in &primitive.annotations {
            self.write_attr(key, value, output);
        }
        if !primitive.annotation_types.is_empty() {
            self.write_indent(output);
            output.push_str("annotations {\n");
            self.indent_level += 1;
            for (name, type_ref) in &primitive.annotation_types {
                self.write_indent(output);
                let _ = writeln!(output, "{} {} {{}}", type_ref, name);
            }
            self.indent_level -= 1;
            self.write_indent(output);
            output.push_str("}\n");
        }
        self.indent_level -= 1;
        output.push_str("}\n");
    }

    fn serialize_instance(&mut self, instance: &InstanceElement, output: &mut String) {
        let type_id = instance.type_ref.base_id();
        let name = instance.elem_id.name();
        if name == crate::lowering::CONFIG_INSTANCE_NAME {
            let _ = writeln!(output, "{} {{", type_id.get_full_name());
        } else {
            let _ = writeln!(output, "{} {} {{", type_id.get_full_name(), name);
        }
        self.indent_level += 1;
        for (key, value) in &instance.annotations {
            self.write_attr(key, value, output);
        }
        for (key, value) in &instance.value {
            self.write_attr(key, value, output);
        }
        self.indent_level -= 1;
        output.push_str("}\n");
    }

    fn serialize_vars(&mut self, variables: &[&Variable], output: &mut String) {
        output.push_str("vars {\n");
        self.indent_level += 1;
        for variable in variables {
            self.write_attr(variable.elem_id.type_name(), &variable.value, output);
        }
        self.indent_level -= 1;
        output.push_str("}\n");
    }

    fn write_attr(&mut self, key: &str, value: &Value, output: &mut String) {
        self.write_indent(output);
        let _ = write!(output, "{} = ", key);
        self.write_value(value, output);
        output.push('\n');
    }

    fn write_value(&mut self, value: &Value, output: &mut String) {
        match value {
            Value::String(text) => self.write_string(text, output),
            Value::Number(number) => {
                if number.fract() == 0.0 && number.abs() < 1e15 {
                    let _ = write!(output, "{}", *number as i64);
                } else {
                    let _ = write!(output, "{}", number);
                }
            }
            Value::Bool(flag) => {
                let _ = write!(output, "{}", flag);
            }
            Value::List(items) => {
                output.push('[');
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        output.push_str(", ");
                    }
                    self.write_value(item, output);
                }
                output.push(']');
            }
            Value::Map(entries) => {
                if entries.is_empty() {
                    output.push_str("{}");
                    return;
                }
                output.push_str("{\n");
                self.indent_level += 1;
                for (key, entry) in entries {
                    self.write_attr(key, entry, output);
                }
                self.indent_level -= 1;
                self.write_indent(output);
                output.push('}');
            }
            Value::Reference(reference) => {
                let _ = write!(output, "{}", reference.elem_id.get_full_name());
            }
            Value::StaticFile(file) => {
                let _ = write!(output, "file(\"{}\")", file.filepath);
            }
            Value::Dynamic => output.push('*'),
        }
    }

    fn write_string(&mut self, text: &str, output: &mut String) {
        if text.contains('\n') && !text.contains("'''") {
            let _ = write!(output, "'''{}\n'''", text);
            return;
        }
        output.push('"');
        for c in text.chars() {
            match c {
                '"' => output.push_str("\\\""),
                '\\' => output.push_str("\\\\"),
                '\n' => output.push_str("\\n"),
                '\t' => output.push_str("\\t"),
                other => output.push(other),
            }
        }
        output.push('"');
    }

    fn write_indent(&self, output: &mut String) {
        for _ in 0..self.indent_level {
            output.push_str("  ");
        }
    }
}

impl Default for Serializer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;

    fn round_trip(source: &str) {
        let first = parse("a.nacl", source);
        assert!(first.errors.is_empty(), "{:?}", first.errors);
        let refs: Vec<&Element> = first.elements.iter().collect();
        let serialized = serialize(&refs);
        let second = parse("a.nacl", &serialized);
        assert!(
            second.errors.is_empty(),
            "reparse errors: {:?}\nsource:\n{}",
            second.errors,
            serialized
        );
        assert_eq!(first.elements, second.elements, "source:\n{}", serialized);
    }

    #[test]
    fn test_round_trip_object_type() {
        round_trip(
            r#"
            type salesforce.Account {
                _required = true
                string Name {
                    label = "Account name"
                }
                list<number> scores {}
                annotations {
                    string internalId {}
                }
            }
            "#,
        );
    }

    #[test]
    fn test_round_trip_primitive_and_settings() {
        round_trip("type salesforce.Text is string {}");
        round_trip("settings salesforce.Config { string url {} }");
    }

    #[test]
    fn test_round_trip_instance() {
        round_trip(
            r#"
            salesforce.Account prod {
                name = "Main"
                count = 3
                ratio = 0.5
                active = true
                tags = ["a", "b"]
                address = { city = "SF" }
                owner = salesforce.User.instance.admin
                logo = file("logo.png")
                _parent = salesforce.Org.instance.main
            }
            "#,
        );
    }

    #[test]
    fn test_round_trip_settings_instance() {
        round_trip("salesforce.Config {\n url = \"x\"\n}");
    }

    #[test]
    fn test_round_trip_vars() {
        round_trip("vars {\n region = \"us-east-1\"\n retries = 3\n}");
    }

    #[test]
    fn test_round_trip_multiline_string() {
        round_trip("salesforce.Account prod { body = '''line one\nline two\n''' }");
    }

    #[test]
    fn test_round_trip_escaped_string() {
        round_trip(r#"salesforce.Account prod { s = "tab\there \"quoted\"" }"#);
    }
}
