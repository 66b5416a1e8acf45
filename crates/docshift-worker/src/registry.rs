//! Converter lookup by conversion kind.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use docshift_core::models::ConversionKind;

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Turns the file at `input` into the file at `output`.
///
/// Implementations are synchronous and run on a blocking thread.
pub trait Converter: Send + Sync {
    fn convert(&self, input: &Path, output: &Path) -> anyhow::Result<()>;
}

impl<F> Converter for F
where
    F: Fn(&Path, &Path) -> anyhow::Result<()> + Send + Sync,
{
    fn convert(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        self(input, output)
    }
}

/// Runs an external program, e.g. `pandoc {input} -o {output}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandConverter {
    program: String,
    args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace-separated command template. The output placeholder
    /// is required.
    pub fn from_template(template: &str) -> anyhow::Result<Self> {
        let mut parts = template.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("converter command template is empty"))?;
        let args: Vec<String> = parts.collect();

        if !args.iter().any(|arg| arg.contains(OUTPUT_PLACEHOLDER)) {
            bail!(
                "converter command `{}` has no {} placeholder",
                template,
                OUTPUT_PLACEHOLDER
            );
        }

        Ok(Self::new(program, args))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn render_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let input = input.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

impl Converter for CommandConverter {
    fn convert(&self, input: &Path, output: &Path) -> anyhow::Result<()> {
        let args = self.render_args(input, output);
        let result = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("failed to start {}", self.program))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let stderr = stderr.trim();
            if stderr.is_empty() {
                bail!("{} exited with {}", self.program, result.status);
            }
            bail!("{} exited with {}: {}", self.program, result.status, stderr);
        }

        if !output.exists() {
            bail!("{} did not produce {}", self.program, output.display());
        }
        Ok(())
    }
}

/// Immutable map from kind to converter, built once at start-up.
#[derive(Clone, Default)]
pub struct ConversionRegistry {
    converters: HashMap<ConversionKind, Arc<dyn Converter>>,
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

impl ConversionRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// One [`CommandConverter`] per configured template.
    pub fn from_commands(commands: &HashMap<ConversionKind, String>) -> anyhow::Result<Self> {
        let mut builder = Self::builder();
        for (kind, template) in commands {
            let converter = CommandConverter::from_template(template)
                .with_context(|| format!("invalid converter for {}", kind))?;
            builder = builder.register(*kind, converter);
        }
        Ok(builder.build())
    }

    pub fn get(&self, kind: ConversionKind) -> Option<Arc<dyn Converter>> {
        self.converters.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ConversionKind) -> bool {
        self.converters.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<ConversionKind> {
        ConversionKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    converters: HashMap<ConversionKind, Arc<dyn Converter>>,
}

impl RegistryBuilder {
    /// Registering a kind twice keeps the last converter.
    pub fn register<C>(mut self, kind: ConversionKind, converter: C) -> Self
    where
        C: Converter + 'static,
    {
        self.converters.insert(kind, Arc::new(converter));
        self
    }

    pub fn build(self) -> ConversionRegistry {
        ConversionRegistry {
            converters: self.converters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_closure_converter_is_registered() {
        let registry = ConversionRegistry::builder()
            .register(
                ConversionKind::CsvToJson,
                |input: &Path, output: &Path| -> anyhow::Result<()> {
                    std::fs::copy(input, output)?;
                    Ok(())
                },
            )
            .build();

        assert!(registry.get(ConversionKind::CsvToJson).is_some());
        assert!(registry.get(ConversionKind::TxtToPdf).is_none());
        assert_eq!(registry.kinds(), vec![ConversionKind::CsvToJson]);
    }

    #[test]
    fn test_template_requires_output_placeholder() {
        assert!(CommandConverter::from_template("").is_err());
        assert!(CommandConverter::from_template("pandoc {input}").is_err());

        let converter = CommandConverter::from_template("pandoc {input} -o {output}").unwrap();
        assert_eq!(converter.program(), "pandoc");
        assert_eq!(
            converter.render_args(&PathBuf::from("/in/a.docx"), &PathBuf::from("/out/b.md")),
            vec!["/in/a.docx", "-o", "/out/b.md"]
        );
    }

    #[test]
    fn test_from_commands_rejects_bad_template() {
        let mut commands = HashMap::new();
        commands.insert(ConversionKind::DocxToPdf, "soffice".to_string());
        assert!(ConversionRegistry::from_commands(&commands).is_err());

        commands.insert(ConversionKind::DocxToPdf, "soffice {input} {output}".to_string());
        let registry = ConversionRegistry::from_commands(&commands).unwrap();
        assert!(registry.contains(ConversionKind::DocxToPdf));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_converter_runs_program() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("in.txt");
        let output = dir.path().join("out.txt");
        std::fs::write(&input, b"hello").unwrap();

        CommandConverter::from_template("cp {input} {output}")
            .unwrap()
            .convert(&input, &output)
            .unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"hello");

        let err = CommandConverter::from_template("false {output}")
            .unwrap()
            .convert(&input, &dir.path().join("never"))
            .unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }
}
