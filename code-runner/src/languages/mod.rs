//! Language registry: a static table of compile/run templates per language.
//! Adding a language is a table edit.

mod template;

pub use template::{validate_file_name, Arg, CommandTemplate, RenderedCommand};

use crate::error::Error;
use which::which;

/// Registry record for one language
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageSpec {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub source_file: &'static str,
    pub executable: &'static str,
    pub compile: Option<CommandTemplate>,
    pub run: CommandTemplate,
    /// Reference image for container-based backends
    pub image: &'static str,
}

/// Commands for one submission, rendered against the record's file names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedCommands {
    pub language: &'static str,
    pub image: &'static str,
    pub source_file: String,
    pub compile: Option<RenderedCommand>,
    pub run: RenderedCommand,
}

impl LanguageSpec {
    pub fn matches(&self, name: &str) -> bool {
        self.id.eq_ignore_ascii_case(name) || self.aliases.iter().any(|a| a.eq_ignore_ascii_case(name))
    }

    pub fn is_compiled(&self) -> bool {
        self.compile.is_some()
    }

    pub fn render(&self) -> Result<RenderedCommands, Error> {
        let compile = self
            .compile
            .as_ref()
            .map(|c| c.render(self.source_file, self.executable))
            .transpose()?;
        let run = self.run.render(self.source_file, self.executable)?;

        Ok(RenderedCommands {
            language: self.id,
            image: self.image,
            source_file: self.source_file.to_string(),
            compile,
            run,
        })
    }

    /// Host programs this language needs, for availability reporting
    pub fn required_tools(&self) -> Vec<&'static str> {
        [self.compile.as_ref(), Some(&self.run)]
            .into_iter()
            .flatten()
            .filter_map(|t| match t.program {
                Arg::Lit(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn is_available(&self) -> bool {
        self.required_tools().iter().all(|tool| which(tool).is_ok())
    }
}

const BUILTIN: &[LanguageSpec] = &[
    LanguageSpec {
        id: "python",
        aliases: &["py", "python3"],
        source_file: "main.py",
        executable: "main.py",
        compile: None,
        run: CommandTemplate::new(Arg::Lit("python3"), &[Arg::Lit("-u"), Arg::Source]),
        image: "python:3.12-slim",
    },
    LanguageSpec {
        id: "javascript",
        aliases: &["js", "node"],
        source_file: "main.js",
        executable: "main.js",
        compile: None,
        run: CommandTemplate::new(Arg::Lit("node"), &[Arg::Source]),
        image: "node:20-slim",
    },
    LanguageSpec {
        id: "typescript",
        aliases: &["ts"],
        source_file: "main.ts",
        executable: "main.js",
        compile: Some(CommandTemplate::new(
            Arg::Lit("tsc"),
            &[Arg::Lit("--target"), Arg::Lit("es2020"), Arg::Lit("--module"), Arg::Lit("commonjs"), Arg::Source],
        )),
        run: CommandTemplate::new(Arg::Lit("node"), &[Arg::Executable]),
        image: "node:20-slim",
    },
    LanguageSpec {
        id: "ruby",
        aliases: &["rb"],
        source_file: "main.rb",
        executable: "main.rb",
        compile: None,
        run: CommandTemplate::new(Arg::Lit("ruby"), &[Arg::Source]),
        image: "ruby:3.3-slim",
    },
    LanguageSpec {
        id: "php",
        aliases: &[],
        source_file: "main.php",
        executable: "main.php",
        compile: None,
        run: CommandTemplate::new(Arg::Lit("php"), &[Arg::Source]),
        image: "php:8.3-cli",
    },
    LanguageSpec {
        id: "go",
        aliases: &["golang"],
        source_file: "main.go",
        executable: "main",
        compile: Some(CommandTemplate::new(
            Arg::Lit("go"),
            &[Arg::Lit("build"), Arg::Lit("-o"), Arg::Executable, Arg::Source],
        )),
        run: CommandTemplate::new(Arg::Executable, &[]),
        image: "golang:1.22",
    },
    LanguageSpec {
        id: "rust",
        aliases: &["rs"],
        source_file: "main.rs",
        executable: "main",
        compile: Some(CommandTemplate::new(
            Arg::Lit("rustc"),
            &[Arg::Lit("-O"), Arg::Lit("-o"), Arg::Executable, Arg::Source],
        )),
        run: CommandTemplate::new(Arg::Executable, &[]),
        image: "rust:1.77-slim",
    },
    LanguageSpec {
        id: "cpp",
        aliases: &["c++", "cxx"],
        source_file: "main.cpp",
        executable: "main",
        compile: Some(CommandTemplate::new(
            Arg::Lit("g++"),
            &[Arg::Lit("-O2"), Arg::Lit("-std=c++17"), Arg::Lit("-o"), Arg::Executable, Arg::Source],
        )),
        run: CommandTemplate::new(Arg::Executable, &[]),
        image: "gcc:13",
    },
    LanguageSpec {
        id: "c",
        aliases: &[],
        source_file: "main.c",
        executable: "main",
        compile: Some(CommandTemplate::new(
            Arg::Lit("gcc"),
            &[Arg::Lit("-O2"), Arg::Lit("-std=c17"), Arg::Lit("-o"), Arg::Executable, Arg::Source, Arg::Lit("-lm")],
        )),
        run: CommandTemplate::new(Arg::Executable, &[]),
        image: "gcc:13",
    },
    LanguageSpec {
        id: "java",
        aliases: &[],
        source_file: "Main.java",
        executable: "Main",
        compile: Some(CommandTemplate::new(Arg::Lit("javac"), &[Arg::Source])),
        run: CommandTemplate::new(Arg::Lit("java"), &[Arg::Lit("-cp"), Arg::Lit("."), Arg::Executable]),
        image: "eclipse-temurin:21",
    },
];

/// Lookup table from language identifier to its command shapes
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    specs: Vec<LanguageSpec>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl LanguageRegistry {
    pub fn builtin() -> Self {
        Self {
            specs: BUILTIN.to_vec(),
        }
    }

    pub fn empty() -> Self {
        Self { specs: Vec::new() }
    }

    /// Add or replace a language record
    pub fn with_language(mut self, spec: LanguageSpec) -> Self {
        self.specs.retain(|s| s.id != spec.id);
        self.specs.push(spec);
        self
    }

    pub fn resolve(&self, language: &str) -> Result<&LanguageSpec, Error> {
        let name = language.trim();
        self.specs
            .iter()
            .find(|s| s.matches(name))
            .ok_or_else(|| Error::UnsupportedLanguage(name.to_string()))
    }

    pub fn languages(&self) -> impl Iterator<Item = &LanguageSpec> {
        self.specs.iter()
    }
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| which(**tool).is_err())
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
