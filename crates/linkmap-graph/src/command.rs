//! Build command line parsing.
//!
//! Splits a recorded shell invocation into directory, executable and
//! arguments, recognizes which tool grammar applies, and infers the path
//! the invocation writes.

use std::path::Path;

use thiserror::Error;

use crate::artifacts::ArtifactType;

/// Errors that can occur while parsing a command line.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Empty command line")]
    Empty,

    #[error("Unbalanced quoting in command line: {0}")]
    Tokenize(String),

    #[error("Argument cannot be quoted for replay: {0}")]
    Quote(String),
}

/// Flags that consume the following token and have no dependency effect.
pub(crate) const VALUE_FLAGS: &[&str] = &[
    "-MT",
    "-MF",
    "-MQ",
    "-D",
    "-U",
    "-x",
    "-include",
    "-imacros",
    "-iprefix",
    "-iwithprefix",
    "-Xlinker",
    "-Xassembler",
    "-Xpreprocessor",
    "-z",
    "-arch",
    "-target",
];

/// Prefixes of single-token flags with no dependency effect.
pub(crate) const IGNORED_FLAG_PREFIXES: &[&str] = &[
    "-O",
    "-g",
    "-f",
    "-W",
    "-m",
    "-std=",
    "-D",
    "-U",
    "-M",
    "-c",
    "-S",
    "-E",
    "-w",
    "-v",
    "-s",
    "-pipe",
    "-pthread",
    "-pie",
    "-no-pie",
    "-rdynamic",
    "-nostdlib",
    "-nostartfiles",
    "-nodefaultlibs",
    "-ansi",
    "-pedantic",
    "--",
];

/// The argument grammar an invocation follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolFamily {
    /// Compiler driver that compiles and/or links (`cc`, `gcc`, `c++`, `g++`)
    CompileLink,
    /// Static archiver (`ar`)
    Archive,
}

impl ToolFamily {
    const COMPILERS: &'static [&'static str] = &["cc", "c++", "gcc", "g++", "clang", "clang++"];
    const ARCHIVERS: &'static [&'static str] = &["ar"];

    /// Recognize an executable by its file name.
    ///
    /// Cross-prefixed tools (`x86_64-linux-gnu-gcc`, `gcc-ar`) match by suffix.
    pub fn detect(executable: &str) -> Option<Self> {
        let name = Path::new(executable)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let matches = |tool: &&str| {
            name == *tool
                || name
                    .strip_suffix(*tool)
                    .is_some_and(|prefix| prefix.ends_with('-'))
        };

        if Self::ARCHIVERS.iter().any(matches) {
            Some(ToolFamily::Archive)
        } else if Self::COMPILERS.iter().any(matches) {
            Some(ToolFamily::CompileLink)
        } else {
            None
        }
    }

    /// Returns the string representation for display.
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolFamily::CompileLink => "compile-link",
            ToolFamily::Archive => "archive",
        }
    }
}

/// A tokenized build invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Working directory of the invocation
    pub directory: String,
    /// The executable as written
    pub executable: String,
    /// Argument tokens after the executable, unquoted
    pub arguments: Vec<String>,
    /// Recognized tool grammar, if any
    pub family: Option<ToolFamily>,
    /// Path written by the invocation, as written on the command line
    pub output: Option<String>,
    /// Classification of `output`
    pub output_type: Option<ArtifactType>,
}

impl ParsedCommand {
    /// Parse a raw invocation line.
    ///
    /// The line may start with the working directory; otherwise
    /// `default_directory` is used.
    pub fn parse(line: &str, default_directory: &str) -> Result<Self, CommandError> {
        let mut tokens = shlex::split(line).ok_or_else(|| CommandError::Tokenize(line.to_string()))?;
        if tokens.is_empty() {
            return Err(CommandError::Empty);
        }

        let leading_directory = tokens.len() >= 2
            && ToolFamily::detect(&tokens[0]).is_none()
            && (ToolFamily::detect(&tokens[1]).is_some() || Path::new(&tokens[0]).is_absolute());

        let directory = if leading_directory {
            tokens.remove(0)
        } else {
            default_directory.to_string()
        };

        let executable = tokens.remove(0);
        Ok(Self::from_arguments(directory, executable, tokens))
    }

    /// Re-parse a stored invocation from its parts.
    pub fn from_parts(directory: &str, executable: &str, args: &str) -> Result<Self, CommandError> {
        let arguments = shlex::split(args).ok_or_else(|| CommandError::Tokenize(args.to_string()))?;
        Ok(Self::from_arguments(directory, executable, arguments))
    }

    /// Build from already tokenized arguments.
    pub fn from_arguments(
        directory: impl Into<String>,
        executable: impl Into<String>,
        arguments: Vec<String>,
    ) -> Self {
        let executable = executable.into();
        let family = ToolFamily::detect(&executable);

        let output = match family {
            Some(ToolFamily::CompileLink) => compile_output(&arguments),
            Some(ToolFamily::Archive) => archive_output(&arguments),
            None => None,
        };
        let output_type = output.as_deref().map(ArtifactType::classify_output);

        Self {
            directory: directory.into(),
            executable,
            arguments,
            family,
            output,
            output_type,
        }
    }

    /// Returns true if the executable follows a known grammar.
    pub fn is_recognized(&self) -> bool {
        self.family.is_some()
    }

    /// The arguments re-joined with shell quoting, suitable for replay.
    pub fn args(&self) -> Result<String, CommandError> {
        shlex::try_join(self.arguments.iter().map(String::as_str))
            .map_err(|e| CommandError::Quote(e.to_string()))
    }
}

/// Returns true if `arg` is a flag whose value is the next token.
fn takes_value(arg: &str) -> bool {
    VALUE_FLAGS.contains(&arg)
        || matches!(arg, "-o" | "-I" | "-L" | "-l" | "-isystem" | "-iquote" | "-idirafter")
}

/// Find the output of a compiler driver invocation.
///
/// Preprocess, assemble-only and dependency-listing runs write no artifact,
/// with or without `-o`. Otherwise falls back to the driver's defaults when
/// `-o` is absent.
fn compile_output(arguments: &[String]) -> Option<String> {
    let mut compile_only = false;
    let mut no_output = false;
    let mut explicit = None;
    let mut first_source = None;

    let mut iter = arguments.iter();
    while let Some(arg) = iter.next() {
        if arg == "-o" {
            explicit = iter.next().cloned();
        } else if let Some(path) = arg.strip_prefix("-o") {
            explicit = Some(path.to_string());
        } else if arg == "-c" {
            compile_only = true;
        } else if arg == "-E" || arg == "-S" || arg == "-M" || arg == "-MM" {
            no_output = true;
        } else if takes_value(arg) {
            iter.next();
        } else if !arg.starts_with('-')
            && first_source.is_none()
            && ArtifactType::classify_input(arg) == ArtifactType::Source
        {
            first_source = Some(arg.as_str());
        }
    }

    if no_output {
        None
    } else if explicit.is_some() {
        explicit
    } else if compile_only {
        let stem = Path::new(first_source?).file_stem()?.to_string_lossy();
        Some(format!("{stem}.o"))
    } else {
        Some("a.out".to_string())
    }
}

/// The first `.a` token of an archiver invocation is the archive it writes.
fn archive_output(arguments: &[String]) -> Option<String> {
    arguments
        .iter()
        .find(|arg| ArtifactType::classify_output(arg.as_str()) == ArtifactType::Static)
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compile_with_directory() {
        let cmd = ParsedCommand::parse("'/some/directory' gcc -o object.o -c source.c", "/cwd")
            .expect("Should parse");

        assert_eq!(cmd.directory, "/some/directory");
        assert_eq!(cmd.executable, "gcc");
        assert_eq!(cmd.family, Some(ToolFamily::CompileLink));
        assert_eq!(cmd.output.as_deref(), Some("object.o"));
        assert_eq!(cmd.output_type, Some(ArtifactType::Object));
    }

    #[test]
    fn test_parse_archive_with_quoted_directory() {
        let cmd = ParsedCommand::parse(
            "\"/some/directory with spaces\" ar qc static.a object.o",
            "/cwd",
        )
        .expect("Should parse");

        assert_eq!(cmd.directory, "/some/directory with spaces");
        assert_eq!(cmd.executable, "ar");
        assert_eq!(cmd.family, Some(ToolFamily::Archive));
        assert_eq!(cmd.output.as_deref(), Some("static.a"));
        assert_eq!(cmd.output_type, Some(ArtifactType::Static));
    }

    #[test]
    fn test_parse_without_directory_uses_default() {
        let cmd = ParsedCommand::parse("g++ -shared -o libfoo.so.1 foo.o", "/build").unwrap();
        assert_eq!(cmd.directory, "/build");
        assert_eq!(cmd.executable, "g++");
        assert_eq!(cmd.output_type, Some(ArtifactType::Shared));
    }

    #[test]
    fn test_parse_attached_output() {
        let cmd = ParsedCommand::parse("cc -oprogram main.o", "/build").unwrap();
        assert_eq!(cmd.output.as_deref(), Some("program"));
        assert_eq!(cmd.output_type, Some(ArtifactType::Executable));
    }

    #[test]
    fn test_default_outputs() {
        let compile = ParsedCommand::parse("gcc -c -I include src/main.c", "/b").unwrap();
        assert_eq!(compile.output.as_deref(), Some("main.o"));

        let link = ParsedCommand::parse("gcc main.o util.o", "/b").unwrap();
        assert_eq!(link.output.as_deref(), Some("a.out"));

        let preprocess = ParsedCommand::parse("gcc -E main.c", "/b").unwrap();
        assert_eq!(preprocess.output, None);
    }

    #[test]
    fn test_no_output_modes_ignore_explicit_output() {
        for line in [
            "gcc -S foo.c -o foo.s",
            "gcc -E -o foo.i foo.c",
            "gcc -M -ofoo.d foo.c",
            "gcc -o foo.d -MM foo.c",
        ] {
            let cmd = ParsedCommand::parse(line, "/b").unwrap();
            assert!(cmd.is_recognized(), "{line}");
            assert_eq!(cmd.output, None, "{line}");
            assert_eq!(cmd.output_type, None, "{line}");
        }

        let with_deps = ParsedCommand::parse("gcc -c -MD -MF foo.d -o foo.o foo.c", "/b").unwrap();
        assert_eq!(with_deps.output.as_deref(), Some("foo.o"));
    }

    #[test]
    fn test_cross_prefixed_tools() {
        assert_eq!(
            ToolFamily::detect("x86_64-linux-gnu-gcc"),
            Some(ToolFamily::CompileLink)
        );
        assert_eq!(ToolFamily::detect("/usr/bin/g++"), Some(ToolFamily::CompileLink));
        assert_eq!(ToolFamily::detect("gcc-ar"), Some(ToolFamily::Archive));
        assert_eq!(ToolFamily::detect("arm-none-eabi-ar"), Some(ToolFamily::Archive));
        assert_eq!(ToolFamily::detect("tar"), None);
        assert_eq!(ToolFamily::detect("make"), None);
    }

    #[test]
    fn test_unrecognized_executable() {
        let cmd = ParsedCommand::parse("/build ld -o out main.o", "/cwd").unwrap();
        assert_eq!(cmd.directory, "/build");
        assert_eq!(cmd.executable, "ld");
        assert!(!cmd.is_recognized());
        assert_eq!(cmd.output, None);
        assert_eq!(cmd.output_type, None);
    }

    #[test]
    fn test_args_preserve_quoting() {
        let cmd = ParsedCommand::parse(
            r#"/b gcc -DNAME="\"value with spaces\"" -c 'my file.c' -o out.o"#,
            "/cwd",
        )
        .unwrap();

        assert_eq!(cmd.arguments[0], "-DNAME=\"value with spaces\"");
        assert_eq!(cmd.arguments[2], "my file.c");

        let replay = cmd.args().unwrap();
        let reparsed = ParsedCommand::from_parts(&cmd.directory, &cmd.executable, &replay).unwrap();
        assert_eq!(reparsed, cmd);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ParsedCommand::parse("   ", "/cwd"),
            Err(CommandError::Empty)
        ));
        assert!(matches!(
            ParsedCommand::parse("gcc 'unterminated", "/cwd"),
            Err(CommandError::Tokenize(_))
        ));
    }
}
