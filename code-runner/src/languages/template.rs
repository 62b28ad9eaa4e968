//! Command templates: argument lists rendered against validated file names.
//! Nothing here is ever passed through a shell.

use crate::error::Error;

/// One element of a command template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Passed through verbatim
    Lit(&'static str),
    /// The source file name inside the workspace
    Source,
    /// The compiled artifact name inside the workspace
    Executable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTemplate {
    pub program: Arg,
    pub args: &'static [Arg],
}

impl CommandTemplate {
    pub const fn new(program: Arg, args: &'static [Arg]) -> Self {
        Self { program, args }
    }

    /// Render into a concrete argv. An `Executable` in program position
    /// becomes a workspace-relative path (`./name`).
    pub fn render(&self, source_file: &str, executable: &str) -> Result<RenderedCommand, Error> {
        validate_file_name(source_file)?;
        validate_file_name(executable)?;

        let program = match self.program {
            Arg::Lit(p) if p.is_empty() => {
                return Err(Error::Render("empty program name".to_string()))
            }
            Arg::Lit(p) => p.to_string(),
            Arg::Source => format!("./{}", source_file),
            Arg::Executable => format!("./{}", executable),
        };

        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                Arg::Lit(s) => (*s).to_string(),
                Arg::Source => source_file.to_string(),
                Arg::Executable => executable.to_string(),
            })
            .collect();

        Ok(RenderedCommand { program, args })
    }
}

/// A command ready to spawn, relative to the workspace directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RenderedCommand {
    /// Program path relative to the workspace, if it names a workspace file
    pub fn workspace_program(&self) -> Option<&str> {
        self.program.strip_prefix("./")
    }
}

/// File names substituted into templates must be plain, single-component
/// names that cannot be mistaken for options.
pub fn validate_file_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.len() > 64 {
        return Err(Error::Render(format!("invalid file name length: {:?}", name)));
    }
    if name.starts_with('-') || name.starts_with('.') {
        return Err(Error::Render(format!("invalid file name: {:?}", name)));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::Render(format!("invalid file name: {:?}", name)));
    }
    Ok(())
}
