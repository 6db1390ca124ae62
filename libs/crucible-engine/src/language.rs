//! Per-language execution profiles.
//!
//! Everything language-specific lives in one lookup: image, source file
//! naming and the shell command that compiles and runs it. Callers resolve
//! the profile once per request instead of branching on the language name
//! at every call site.

use crucible_common::types::{Language, SourceFile};

/// Writable scratch mount inside every sandbox container. Source files,
/// compiled artifacts and nothing else live here.
pub const WORKDIR: &str = "/sandbox";

#[derive(Debug, Clone, Copy)]
enum SourceNaming {
    /// Conventional fixed file name (`main.py`, `main.js`, `main.cpp`).
    Fixed(&'static str),
    /// Java wants the file named after its public class.
    JavaClass,
}

#[derive(Debug, Clone, Copy)]
pub struct LanguageProfile {
    pub language: Language,
    pub default_image: &'static str,
    pub extension: &'static str,
    naming: SourceNaming,
}

static PROFILES: [LanguageProfile; 4] = [
    LanguageProfile {
        language: Language::Python,
        default_image: "crucible-python:latest",
        extension: "py",
        naming: SourceNaming::Fixed("main.py"),
    },
    LanguageProfile {
        language: Language::Javascript,
        default_image: "crucible-node:latest",
        extension: "js",
        naming: SourceNaming::Fixed("main.js"),
    },
    LanguageProfile {
        language: Language::Java,
        default_image: "crucible-java:latest",
        extension: "java",
        naming: SourceNaming::JavaClass,
    },
    LanguageProfile {
        language: Language::Cpp,
        default_image: "crucible-cpp:latest",
        extension: "cpp",
        naming: SourceNaming::Fixed("main.cpp"),
    },
];

impl LanguageProfile {
    pub fn of(language: Language) -> &'static LanguageProfile {
        PROFILES
            .iter()
            .find(|p| p.language == language)
            .expect("every Language variant has a profile")
    }

    /// File name the submitted source is written under.
    pub fn source_file(&self, code: &str) -> String {
        match self.naming {
            SourceNaming::Fixed(name) => name.to_string(),
            SourceNaming::JavaClass => format!("{}.java", java_class_name(code)),
        }
    }

    /// Shell command that runs (and for compiled languages first builds)
    /// the given source file. Compile and run are chained with `&&` so a
    /// failed compile short-circuits execution and its diagnostics land on
    /// stderr untouched.
    pub fn run_command(&self, file_name: &str) -> String {
        match self.language {
            Language::Python => format!("python3 -u {WORKDIR}/{file_name}"),
            Language::Javascript => format!("node {WORKDIR}/{file_name}"),
            Language::Cpp => format!(
                "g++ -O2 -o {WORKDIR}/a.out {WORKDIR}/{file_name} && {WORKDIR}/a.out"
            ),
            Language::Java => {
                let class = file_name.trim_end_matches(".java");
                format!("cd {WORKDIR} && javac {file_name} && java {class}")
            }
        }
    }

    /// Entry file for a multi-file run: the conventionally named file if
    /// present, otherwise the first file with this language's extension.
    pub fn entry_file(&self, files: &[SourceFile]) -> Option<String> {
        let conventional = match self.naming {
            SourceNaming::Fixed(name) => Some(name),
            SourceNaming::JavaClass => Some("Main.java"),
        };
        if let Some(name) = conventional {
            if files.iter().any(|f| f.name == name) {
                return Some(name.to_string());
            }
        }
        files
            .iter()
            .find(|f| f.name.ends_with(&format!(".{}", self.extension)))
            .map(|f| f.name.clone())
    }
}

/// Extract the public class name from Java source, defaulting to `Main`.
/// A lightweight token scan is enough here: we only need the identifier
/// following the first `public class` pair, not a full parse.
fn java_class_name(code: &str) -> String {
    let mut rest = code;
    while let Some(pos) = rest.find("public") {
        rest = &rest[pos + "public".len()..];
        if !rest.starts_with(|c: char| c.is_whitespace()) {
            continue;
        }
        let after = rest.trim_start();
        let Some(after_class) = after.strip_prefix("class") else {
            continue;
        };
        if !after_class.starts_with(|c: char| c.is_whitespace()) {
            continue;
        }
        let name: String = after_class
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if !name.is_empty() && !name.starts_with(|c: char| c.is_ascii_digit()) {
            return name;
        }
    }
    "Main".to_string()
}
