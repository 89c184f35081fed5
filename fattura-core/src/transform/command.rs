//! XSLT 1.0 engine backed by an external `xsltproc` process.
use super::{Transform, TransformEngine, TransformError};
use libxml::parser::{Parser, ParserOptions};
use std::{
    io::Write,
    path::{Path, PathBuf},
    process::{Command, Output, Stdio},
};
use tempfile::NamedTempFile;
use tracing::debug;

const XSLT_NS: &str = "http://www.w3.org/1999/XSL/Transform";

/// Input used to have the program compile a staged stylesheet.
const COMPILE_CHECK_INPUT: &[u8] = b"<compile-check/>";

/// Runs transforms through an `xsltproc`-compatible command line.
///
/// Compiling checks that the source is a well-formed XSLT stylesheet, stages it
/// in a temporary file and has the program compile it once against a trivial
/// input, so XPath and instruction errors surface at compile time. Every
/// application is a separate process.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: PathBuf,
}

impl CommandEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Default for CommandEngine {
    fn default() -> Self {
        Self::new("xsltproc")
    }
}

impl TransformEngine for CommandEngine {
    fn compile(&self, name: &str, source: &[u8]) -> Result<Box<dyn Transform>, TransformError> {
        check_stylesheet(name, source)?;

        let compile_error = |e: std::io::Error| TransformError::Compile {
            name: name.to_string(),
            message: format!("failed to stage stylesheet: {e}"),
        };
        let mut stylesheet = tempfile::Builder::new()
            .prefix("fattura-")
            .suffix(".xsl")
            .tempfile()
            .map_err(compile_error)?;
        stylesheet.write_all(source).map_err(compile_error)?;
        stylesheet.flush().map_err(compile_error)?;

        let transform = CommandTransform {
            program: self.program.clone(),
            name: name.to_string(),
            stylesheet,
        };
        // only stylesheet failures count; the check input may well be rejected
        let output = transform.run(COMPILE_CHECK_INPUT, &[])?;
        let code = output.status.code();
        if matches!(code, Some(4) | Some(5)) {
            return Err(transform.failure(code, &output.stderr));
        }
        debug!(transform = %name, program = %self.program.display(), "stylesheet compiled");
        Ok(Box::new(transform))
    }
}

fn check_stylesheet(name: &str, source: &[u8]) -> Result<(), TransformError> {
    let compile_error = |message: String| TransformError::Compile {
        name: name.to_string(),
        message,
    };
    let options = ParserOptions {
        recover: false,
        ..ParserOptions::default()
    };
    let doc = Parser::default()
        .parse_string_with_options(source, options)
        .map_err(|e| compile_error(format!("stylesheet is not well-formed: {e:?}")))?;
    let root = doc
        .get_root_element()
        .ok_or_else(|| compile_error("stylesheet has no root element".into()))?;
    let namespace = root.get_namespace().map(|ns| ns.get_href());
    let local_name = root.get_name();
    if namespace.as_deref() != Some(XSLT_NS)
        || !matches!(local_name.as_str(), "stylesheet" | "transform")
    {
        return Err(compile_error(format!(
            "root element '{local_name}' is not an XSLT stylesheet"
        )));
    }
    Ok(())
}

struct CommandTransform {
    program: PathBuf,
    name: String,
    stylesheet: NamedTempFile,
}

impl CommandTransform {
    fn failure(&self, code: Option<i32>, stderr: &[u8]) -> TransformError {
        let name = self.name.clone();
        let message = format!(
            "{} exited with {}: {}",
            self.program.display(),
            code.map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            String::from_utf8_lossy(stderr).trim()
        );
        // xsltproc: 4/5 stylesheet errors, 6 input document errors
        match code {
            Some(4) | Some(5) => TransformError::Compile { name, message },
            Some(6) => TransformError::Input { name, message },
            _ => TransformError::Execute { name, message },
        }
    }

    /// Run the program over `input`; only failing to run it at all is an error.
    fn run(&self, input: &[u8], params: &[(&str, &str)]) -> Result<Output, TransformError> {
        let mut command = Command::new(&self.program);
        command.arg("--nonet");
        for (param, value) in params {
            command.arg("--stringparam").arg(param).arg(value);
        }
        command
            .arg(self.stylesheet.path())
            .arg("-")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let execute_error = |message: String| TransformError::Execute {
            name: self.name.clone(),
            message,
        };
        let mut child = command
            .spawn()
            .map_err(|e| execute_error(format!("failed to start {}: {e}", self.program.display())))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| execute_error("child stdin unavailable".into()))?;

        let (output, written) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || stdin.write_all(input));
            let output = child.wait_with_output();
            (output, writer.join())
        });
        let output = output.map_err(|e| execute_error(format!("failed to wait for transform: {e}")))?;

        // a program exiting early closes its stdin; its status says why
        if output.status.success() {
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(execute_error(format!("failed to write input: {e}"))),
                Err(_) => return Err(execute_error("input writer panicked".into())),
            }
        }
        Ok(output)
    }
}

impl Transform for CommandTransform {
    fn apply(&mut self, input: &[u8], params: &[(&str, &str)]) -> Result<Vec<u8>, TransformError> {
        let output = self.run(input, params)?;
        if !output.status.success() {
            return Err(self.failure(output.status.code(), &output.stderr));
        }
        debug!(
            transform = %self.name,
            input_bytes = input.len(),
            output_bytes = output.stdout.len(),
            "transform applied"
        );
        Ok(output.stdout)
    }
}
