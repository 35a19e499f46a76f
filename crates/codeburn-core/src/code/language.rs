use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::CodeBurnError;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    JavaScript,
    Java,
    Cpp,
    Rust,
    Go,
}

impl Language {
    pub fn label(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::Java => "Java",
            Language::Cpp => "C++",
            Language::Rust => "Rust",
            Language::Go => "Go",
        }
    }

    /// Stable lowercase identifier used in file names, CLI flags and records.
    pub fn name(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Rust => "rust",
            Language::Go => "go",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Rust => "rs",
            Language::Go => "go",
        }
    }

    /// Info strings a generator may put after an opening code fence.
    /// The first entry is the canonical tag.
    pub fn fence_tags(&self) -> &'static [&'static str] {
        match self {
            Language::Python => &["python", "py", "python3"],
            Language::JavaScript => &["javascript", "js", "node"],
            Language::Java => &["java"],
            Language::Cpp => &["cpp", "c++", "cxx"],
            Language::Rust => &["rust", "rs"],
            Language::Go => &["go", "golang"],
        }
    }

    pub fn from_fence_tag(tag: &str) -> Option<Language> {
        let tag = tag.trim().to_ascii_lowercase();
        Language::all()
            .iter()
            .copied()
            .find(|lang| lang.fence_tags().contains(&tag.as_str()))
    }

    pub fn all() -> &'static [Language] {
        &[
            Language::Python,
            Language::JavaScript,
            Language::Java,
            Language::Cpp,
            Language::Rust,
            Language::Go,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Language {
    type Err = CodeBurnError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Language::all()
            .iter()
            .copied()
            .find(|lang| lang.name() == wanted)
            .ok_or_else(|| CodeBurnError::UnknownLanguage(s.to_string()))
    }
}
