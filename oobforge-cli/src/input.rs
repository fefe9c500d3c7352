//! Where the CLI gets verification codes from.

use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use oobforge_core::{
    CodeSource, LinkExtractor, MailboxCodeSource, MessageFeed, SourceError, StaticCode,
};
use tokio::io::{AsyncBufReadExt, BufReader};

/// Asks the operator on the console.
///
/// Accepts either the bare code or the whole sign-in link pasted from the
/// email.
pub struct PromptCodeSource {
    extractor: LinkExtractor,
}

impl PromptCodeSource {
    pub fn new(extractor: LinkExtractor) -> Self {
        Self { extractor }
    }

    fn code_from_input(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        match self.extractor.extract(line) {
            Some(link) => Some(link.code),
            None => Some(line.to_string()),
        }
    }
}

#[async_trait]
impl CodeSource for PromptCodeSource {
    async fn next_code(&self, email: &str) -> Result<String, SourceError> {
        eprintln!();
        eprintln!("A sign-in email was sent to {}.", email);
        eprintln!("Paste the link from the email, or just the oobCode value.");
        eprint!("Code: ");
        std::io::stderr().flush()?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let line = lines.next_line().await?.ok_or(SourceError::Closed)?;

        self.code_from_input(&line).ok_or(SourceError::Empty)
    }
}

/// A saved email body, delivered once.
pub struct FileMessageFeed {
    path: PathBuf,
    delivered: AtomicBool,
}

impl FileMessageFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delivered: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl MessageFeed for FileMessageFeed {
    async fn next_body(&self) -> Result<Option<String>, SourceError> {
        if self.delivered.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let body = tokio::fs::read_to_string(&self.path).await?;
        Ok(Some(body))
    }
}

/// Which source a run uses, chosen from command-line flags.
pub enum CodeInput {
    Fixed(StaticCode),
    EmailFile(MailboxCodeSource<FileMessageFeed>),
    Prompt(PromptCodeSource),
}

impl CodeInput {
    /// `--code` wins over `--body-file`; with neither, prompt.
    pub fn from_flags(
        code: Option<String>,
        body_file: Option<PathBuf>,
        extractor: LinkExtractor,
    ) -> Self {
        match (code, body_file) {
            (Some(code), _) => CodeInput::Fixed(StaticCode::new(code)),
            (None, Some(path)) => {
                CodeInput::EmailFile(MailboxCodeSource::new(FileMessageFeed::new(path), extractor))
            }
            (None, None) => CodeInput::Prompt(PromptCodeSource::new(extractor)),
        }
    }

    /// Whether the operator can be asked again after a bad code.
    pub fn is_interactive(&self) -> bool {
        matches!(self, CodeInput::Prompt(_))
    }

    pub fn source(&self) -> &dyn CodeSource {
        match self {
            CodeInput::Fixed(source) => source,
            CodeInput::EmailFile(source) => source,
            CodeInput::Prompt(source) => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oobforge_core::ExtractorConfig;
    use tempfile::TempDir;

    fn extractor() -> LinkExtractor {
        LinkExtractor::new(&ExtractorConfig::default()).unwrap()
    }

    #[test]
    fn test_prompt_accepts_pasted_link() {
        let prompt = PromptCodeSource::new(extractor());
        let pasted = "https://demo.firebaseapp.com/__/auth/action?mode=signIn&oobCode=ABC&lang=en";
        assert_eq!(prompt.code_from_input(pasted).as_deref(), Some("ABC"));
    }

    #[test]
    fn test_prompt_accepts_bare_code() {
        let prompt = PromptCodeSource::new(extractor());
        assert_eq!(prompt.code_from_input("  ABC123 \n").as_deref(), Some("ABC123"));
        assert_eq!(prompt.code_from_input("   "), None);
    }

    #[tokio::test]
    async fn test_body_file_source() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("email.html");
        std::fs::write(
            &path,
            r#"<a href="https://demo.firebaseapp.com/__/auth/action?mode=signIn&amp;oobCode=FILE1">Sign in</a>"#,
        )
        .unwrap();

        let input = CodeInput::from_flags(None, Some(path), extractor());
        assert!(!input.is_interactive());
        assert_eq!(input.source().next_code("a@b.com").await.unwrap(), "FILE1");

        // The file is only delivered once.
        assert!(matches!(
            input.source().next_code("a@b.com").await,
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_code_flag_wins() {
        let input = CodeInput::from_flags(
            Some("FLAG".to_string()),
            Some(PathBuf::from("/nonexistent")),
            extractor(),
        );
        assert_eq!(input.source().next_code("a@b.com").await.unwrap(), "FLAG");
    }

    #[tokio::test]
    async fn test_missing_body_file() {
        let input = CodeInput::from_flags(None, Some(PathBuf::from("/nonexistent/mail")), extractor());
        assert!(matches!(
            input.source().next_code("a@b.com").await,
            Err(SourceError::Io(_))
        ));
    }
}
