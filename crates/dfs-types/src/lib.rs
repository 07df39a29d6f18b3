/// Errors that can occur when validating a filename.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilenameError {
    /// The input was empty
    #[error("filename cannot be empty")]
    Empty,
    /// The input contained a path separator and would escape the flat namespace
    #[error("invalid filename: must not contain path separators")]
    PathSeparator,
    /// The input names the current or parent directory
    #[error("invalid filename: '{0}' is a reserved name")]
    Reserved(String),
    /// The input contained a NUL or other control character
    #[error("invalid filename: must not contain control characters")]
    ControlCharacter,
}

/// A filename in the flat storage namespace.
///
/// A `Filename` is guaranteed to be its own base name: it is non-empty, contains no `/` or `\`,
/// and is neither `.` nor `..`. Unlike free text, the input is **not** trimmed; surrounding
/// whitespace is part of the name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Filename(String);

impl Filename {
    /// Validates `input` and wraps it as a `Filename`.
    ///
    /// # Errors
    ///
    /// Returns a [`FilenameError`] describing the first rule the input violates.
    pub fn parse(input: impl AsRef<str>) -> Result<Self, FilenameError> {
        let input = input.as_ref();
        if input.is_empty() {
            return Err(FilenameError::Empty);
        }
        if input.contains(['/', '\\']) {
            return Err(FilenameError::PathSeparator);
        }
        if input == "." || input == ".." {
            return Err(FilenameError::Reserved(input.to_owned()));
        }
        if input.chars().any(char::is_control) {
            return Err(FilenameError::ControlCharacter);
        }
        Ok(Self(input.to_owned()))
    }

    /// Returns the inner string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the filename, returning the owned string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for Filename {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Filename {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Filename {
    type Err = FilenameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl serde::Serialize for Filename {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Filename {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Filename::parse(&s).map_err(serde::de::Error::custom)
    }
}
