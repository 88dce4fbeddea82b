//! HTML tag helpers for embedding compiled stylesheets

use crate::compiler::Compiler;
use crate::types::Options;
use indexmap::IndexMap;
use std::path::Path;

pub type Attributes = IndexMap<String, String>;

pub fn escape_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn render_attributes(attributes: &Attributes) -> String {
    attributes
        .iter()
        .map(|(name, value)| format!(" {}=\"{}\"", name, escape_attribute(value)))
        .collect()
}

/// An HTML comment carrying an error message
pub fn error_comment(message: &str) -> String {
    format!("<!-- cssforge: {} -->", message.replace("--", "- -"))
}

/// Compile `file` and link the output
pub fn link_tag(compiler: &Compiler, file: impl AsRef<Path>, options: &Options, attributes: &Attributes) -> String {
    let file = file.as_ref();
    match compiler.compile_file_with_output(file, options) {
        Ok(output) => {
            let mut attributes = attributes.clone();
            attributes.insert("rel".to_string(), "stylesheet".to_string());
            attributes.insert("href".to_string(), output.public_path);
            format!("<link{} />", render_attributes(&attributes))
        }
        Err(e) => error_comment(&e.to_string()),
    }
}

/// Compile `file` and inline the output in a `<style>` tag
pub fn inline_tag(compiler: &Compiler, file: impl AsRef<Path>, options: &Options, attributes: &Attributes) -> String {
    let file = file.as_ref();
    let output = match compiler.compile_file_with_output(file, options) {
        Ok(output) => output,
        Err(e) => return error_comment(&e.to_string()),
    };
    match compiler.fs.read(&output.output_path) {
        Ok(css) => style_tag(&css, attributes),
        Err(e) => error_comment(&format!("Output {} not readable: {}", output.output_path.display(), e)),
    }
}

/// Compile `source` and inline the result
pub fn string_tag(compiler: &Compiler, source: &str, options: &Options, attributes: &Attributes) -> String {
    let compilation = compiler.compile_string(source, options);
    if compilation.css.is_empty() && compilation.has_errors() {
        let reason = compilation
            .diagnostics
            .first()
            .map(|d| d.to_string())
            .unwrap_or_default();
        return error_comment(&reason);
    }
    style_tag(&compilation.css, attributes)
}

fn style_tag(css: &str, attributes: &Attributes) -> String {
    format!("<style{}>{}</style>", render_attributes(attributes), css.replace("</", "<\\/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemoryFs;
    use crate::types::VendorTarget;
    use std::sync::Arc;

    fn setup() -> Compiler {
        let fs = MemoryFs::new();
        fs.insert("/css/main.css", ".a{x:y}", 5);
        Compiler::new().with_file_system(Arc::new(fs))
    }

    fn options() -> Options {
        Options {
            vendor_target: VendorTarget::None,
            versioning: false,
            cache: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_link_tag() {
        let mut attributes = Attributes::new();
        attributes.insert("media".to_string(), "screen & print".to_string());
        let tag = link_tag(&setup(), "/css/main.css", &options(), &attributes);
        assert_eq!(
            tag,
            "<link media=\"screen &amp; print\" rel=\"stylesheet\" href=\"/css/main.compiled.css\" />"
        );
    }

    #[test]
    fn test_inline_tag() {
        let tag = inline_tag(&setup(), "/css/main.css", &options(), &Attributes::new());
        assert_eq!(tag, "<style>.a{x:y}</style>");
    }

    #[test]
    fn test_errors_become_comments() {
        let compiler = setup();
        let tag = link_tag(&compiler, "/css/missing.css", &options(), &Attributes::new());
        assert!(tag.starts_with("<!-- cssforge: File not found"));
        let tag = string_tag(&compiler, ".a{", &options(), &Attributes::new());
        assert!(tag.starts_with("<!-- cssforge: error: Unbalanced"));
    }
}
