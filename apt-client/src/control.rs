// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Defines primitives in control files.

Control files (also known as *deb822* files) are a series of paragraphs
separated by blank lines. Each paragraph is a series of `Name: value` fields.
Values can span multiple lines by indenting the continuation lines.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html>
for the canonical source of truth for how control files work.
*/

use {
    crate::error::Result,
    futures::{AsyncBufRead, AsyncBufReadExt},
    log::trace,
    pin_project::pin_project,
    std::{borrow::Cow, io::BufRead},
};

/// A field in a control file.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlField<'a> {
    name: Cow<'a, str>,
    value: Cow<'a, str>,
}

impl<'a> ControlField<'a> {
    /// Construct an instance from a field name and value.
    pub fn new(name: Cow<'a, str>, value: Cow<'a, str>) -> Self {
        Self { name, value }
    }

    /// The name of this field.
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Obtain the value as a [&str].
    ///
    /// The value's original file formatting (including newlines and the leading
    /// whitespace of continuation lines) is included.
    pub fn value_str(&self) -> &str {
        self.value.as_ref()
    }

    /// Whether the value spans multiple lines.
    pub fn is_multiline(&self) -> bool {
        self.value.contains('\n')
    }

    /// Obtain an iterator of words in the value.
    pub fn iter_words(&self) -> Box<(dyn Iterator<Item = &str> + '_)> {
        Box::new(self.value.as_ref().split_ascii_whitespace())
    }

    /// Obtain an iterator of lines in the value.
    ///
    /// Leading whitespace from each line is stripped. The deb822 empty line
    /// marker (a continuation line consisting of a single `.`) is rendered as an
    /// empty line, which reconstructs the original text of multiline values such
    /// as embedded key material.
    pub fn iter_lines(&self) -> Box<(dyn Iterator<Item = &str> + '_)> {
        Box::new(self.value.lines().map(|line| {
            let line = line.trim();
            if line == "." {
                ""
            } else {
                line
            }
        }))
    }
}

/// A paragraph in a control file.
///
/// A paragraph is an ordered series of control fields.
///
/// Field names are case insensitive on read and case preserving on set.
///
/// Paragraphs can only contain a single occurrence of a field and this is enforced through
/// the mutation APIs.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ControlParagraph<'a> {
    fields: Vec<ControlField<'a>>,
}

impl<'a> ControlParagraph<'a> {
    /// Whether the paragraph is empty.
    ///
    /// Empty is defined by the lack of any fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The number of fields in this paragraph.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Set the value of a field via a [ControlField].
    ///
    /// If a field with the same name (case insensitive compare) already exists, the old value
    /// will be replaced by the incoming value.
    pub fn set_field(&mut self, field: ControlField<'a>) {
        self.fields
            .retain(|cf| !cf.name.eq_ignore_ascii_case(&field.name));
        self.fields.push(field);
    }

    /// Set the value of a field defined via strings.
    ///
    /// If a field with the same name (case insensitive compare) already exists, the old value
    /// will be replaced by the incoming value.
    pub fn set_field_from_string(&mut self, name: Cow<'a, str>, value: Cow<'a, str>) {
        self.set_field(ControlField::new(name, value));
    }

    /// Whether a named field is present in this paragraph.
    pub fn has_field(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Iterate over fields in this paragraph.
    ///
    /// Iteration order is insertion order.
    pub fn iter_fields(&self) -> impl Iterator<Item = &ControlField<'a>> {
        self.fields.iter()
    }

    /// Obtain the field with a given name in this paragraph.
    pub fn field(&self, name: &str) -> Option<&'_ ControlField<'a>> {
        self.fields
            .iter()
            .find(|f| f.name.as_ref().eq_ignore_ascii_case(name))
    }

    /// Obtain the raw string value of the named field.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the value of a field parsed as a [u64].
    pub fn field_u64(&self, name: &str) -> Option<Result<u64>> {
        self.field_str(name)
            .map(|v| v.parse::<u64>().map_err(|e| e.into()))
    }

    /// Obtain an iterator of words in the named field.
    pub fn field_iter_value_words(
        &self,
        name: &str,
    ) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.field(name).map(|f| f.iter_words())
    }

    /// Obtain an iterator of lines in the named field.
    pub fn field_iter_value_lines(
        &self,
        name: &str,
    ) -> Option<Box<(dyn Iterator<Item = &str> + '_)>> {
        self.field(name).map(|f| f.iter_lines())
    }
}

/// Holds parsing state for Debian control files.
///
/// Instances of this type are essentially fed lines of text and periodically emit
/// [ControlParagraph] instances as they are completed.
#[derive(Clone, Debug, Default)]
pub struct ControlFileParser {
    paragraph: ControlParagraph<'static>,
    field: Option<(String, String)>,
}

impl ControlFileParser {
    /// Write a line to the parser.
    ///
    /// Trailing line terminators (`\n` or `\r\n`) are ignored.
    ///
    /// If the line terminates an in-progress paragraph, that paragraph will be returned.
    /// Otherwise `None` is returned.
    pub fn write_line(&mut self, line: &str) -> Option<ControlParagraph<'static>> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);

        // Empty lines signify the end of a paragraph. Flush any state.
        if line.trim().is_empty() {
            self.flush_field();

            return if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            };
        }

        if line.starts_with(' ') || line.starts_with('\t') {
            // A continuation of the current field. The newline is preserved.
            if let Some((_, value)) = self.field.as_mut() {
                value.push('\n');
                value.push_str(line);
            } else {
                trace!("ignoring continuation line outside of a field: {}", line);
            }

            return None;
        }

        // Any other line begins a new field. Lines without a field name are
        // dropped and leave the current field open.
        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                self.flush_field();
                self.field = Some((name.trim().to_string(), value.to_string()));
            }
            _ => {
                trace!("ignoring line without field name: {}", line);
            }
        }

        None
    }

    /// Finish parsing, consuming self.
    ///
    /// If a non-empty paragraph is present in the instance, it will be returned. Else if there
    /// is no unflushed state, None is returned.
    pub fn finish(mut self) -> Option<ControlParagraph<'static>> {
        self.flush_field();

        if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        }
    }

    fn flush_field(&mut self) {
        if let Some((name, value)) = self.field.take() {
            self.paragraph.set_field_from_string(
                Cow::Owned(name),
                Cow::Owned(value.trim().to_string()),
            );
        }
    }
}

/// A reader for [ControlParagraph].
///
/// Instances are bound to a reader, which is capable of feeding lines into a parser.
///
/// Instances can be consumed as an iterator. Each call into the iterator will attempt to
/// read a full paragraph from the underlying reader. Once the end of input is reached
/// the iterator is exhausted and cannot be restarted.
pub struct ControlParagraphReader<R: BufRead> {
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R: BufRead> ControlParagraphReader<R> {
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    fn get_next(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let mut parser = if let Some(parser) = self.parser.take() {
            parser
        } else {
            return Ok(None);
        };

        loop {
            let mut line = String::new();

            let bytes_read = self.reader.read_line(&mut line)?;

            if bytes_read != 0 {
                if let Some(paragraph) = parser.write_line(&line) {
                    self.parser.replace(parser);
                    return Ok(Some(paragraph));
                }
                // Continue reading.
            } else {
                return Ok(parser.finish());
            }
        }
    }
}

impl<R: BufRead> Iterator for ControlParagraphReader<R> {
    type Item = Result<ControlParagraph<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.get_next().transpose()
    }
}

/// An asynchronous reader of [ControlParagraph].
///
/// Instances are bound to a reader, which is capable of reading lines.
#[pin_project]
pub struct ControlParagraphAsyncReader<R> {
    #[pin]
    reader: R,
    parser: Option<ControlFileParser>,
}

impl<R> ControlParagraphAsyncReader<R>
where
    R: AsyncBufRead + Unpin,
{
    /// Create a new instance bound to a reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: Some(ControlFileParser::default()),
        }
    }

    /// Read the next available paragraph from this reader.
    ///
    /// Resolves to [None] on end of input.
    pub async fn read_paragraph(&mut self) -> Result<Option<ControlParagraph<'static>>> {
        let mut parser = if let Some(parser) = self.parser.take() {
            parser
        } else {
            return Ok(None);
        };

        loop {
            let mut line = String::new();

            let bytes_read = self.reader.read_line(&mut line).await?;

            if bytes_read != 0 {
                if let Some(paragraph) = parser.write_line(&line) {
                    self.parser.replace(parser);
                    return Ok(Some(paragraph));
                }
                // Continue reading.
            } else {
                return Ok(parser.finish());
            }
        }
    }
}

/// A debian control file.
///
/// A control file is an ordered series of paragraphs.
#[derive(Clone, Debug, Default)]
pub struct ControlFile<'a> {
    paragraphs: Vec<ControlParagraph<'a>>,
}

impl<'a> ControlFile<'a> {
    /// Construct a new instance by parsing data from a reader.
    pub fn parse_reader<R: BufRead>(reader: R) -> Result<Self> {
        let paragraphs = ControlParagraphReader::new(reader).collect::<Result<Vec<_>>>()?;

        Ok(Self { paragraphs })
    }

    /// Parse a control file from a string.
    pub fn parse_str(s: &str) -> Result<Self> {
        Self::parse_reader(std::io::BufReader::new(s.as_bytes()))
    }

    /// Obtain paragraphs in this control file.
    pub fn paragraphs(&self) -> impl Iterator<Item = &ControlParagraph<'a>> {
        self.paragraphs.iter()
    }

    /// Obtain paragraphs in this control file, consuming self.
    pub fn into_paragraphs(self) -> impl Iterator<Item = ControlParagraph<'a>> {
        self.paragraphs.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, indoc::indoc};

    #[test]
    fn control_paragraph_field_semantics() {
        let mut p = ControlParagraph::default();

        // Same cased field name results in overwrite.
        p.set_field_from_string("foo".into(), "bar".into());
        p.set_field_from_string("foo".into(), "baz".into());
        assert_eq!(p.field("foo").unwrap().value, "baz");

        // Different case results in overwrite.
        p.set_field_from_string("FOO".into(), "bar".into());
        assert_eq!(p.field("foo").unwrap().value, "bar");
        assert_eq!(p.field("FOO").unwrap().value, "bar");
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn parse_multiple_paragraphs() -> Result<()> {
        let control = ControlFile::parse_str(indoc! {"
            Package: foo
            Version: 1.0

            Package: bar
            Version: 2.0
        "})?;

        let paragraphs = control.paragraphs().collect::<Vec<_>>();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].field_str("package"), Some("foo"));
        assert_eq!(paragraphs[1].field_str("VERSION"), Some("2.0"));

        Ok(())
    }

    #[test]
    fn multiline_continuation_preserves_newlines() -> Result<()> {
        let control = ControlFile::parse_str(indoc! {"
            Package: foo
            Description: short summary
             first continuation
             second continuation
            Section: misc
        "})?;

        let p = control.paragraphs().next().unwrap();
        assert_eq!(
            p.field_str("Description"),
            Some("short summary\n first continuation\n second continuation")
        );
        assert_eq!(p.field_str("Section"), Some("misc"));
        assert_eq!(
            p.field_iter_value_lines("Description")
                .unwrap()
                .collect::<Vec<_>>(),
            vec!["short summary", "first continuation", "second continuation"]
        );

        Ok(())
    }

    #[test]
    fn tab_indented_continuation() -> Result<()> {
        let control = ControlFile::parse_str("Files:\n\tone\n\ttwo\n")?;
        let p = control.paragraphs().next().unwrap();
        assert_eq!(p.field_str("Files"), Some("one\n\ttwo"));

        Ok(())
    }

    #[test]
    fn empty_line_marker_renders_blank_line() -> Result<()> {
        let control = ControlFile::parse_str(indoc! {"
            Signed-By:
             -----BEGIN PGP PUBLIC KEY BLOCK-----
             .
             mQINBGYov84BEADSrLhiWvqL3JJ3fTxjCGD4
             -----END PGP PUBLIC KEY BLOCK-----
        "})?;

        let p = control.paragraphs().next().unwrap();
        let field = p.field("signed-by").unwrap();
        assert!(field.is_multiline());
        assert_eq!(
            field.iter_lines().collect::<Vec<_>>().join("\n"),
            "-----BEGIN PGP PUBLIC KEY BLOCK-----\n\nmQINBGYov84BEADSrLhiWvqL3JJ3fTxjCGD4\n-----END PGP PUBLIC KEY BLOCK-----"
        );

        Ok(())
    }

    #[test]
    fn lines_without_colon_are_ignored() -> Result<()> {
        let control = ControlFile::parse_str(indoc! {"
            -----BEGIN PGP SIGNED MESSAGE-----
            Origin: Debian
            garbage line
            : no name
            Label: Debian
        "})?;

        let p = control.paragraphs().next().unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.field_str("Origin"), Some("Debian"));
        assert_eq!(p.field_str("Label"), Some("Debian"));

        Ok(())
    }

    #[test]
    fn line_without_colon_keeps_field_open() -> Result<()> {
        let control = ControlFile::parse_str(
            "Package: foo\nDescription: summary\n first\ngarbage line\n second\n",
        )?;

        let p = control.paragraphs().next().unwrap();
        assert_eq!(p.field_str("Package"), Some("foo"));
        assert_eq!(p.field_str("Description"), Some("summary\n first\n second"));
        assert_eq!(p.len(), 2);

        Ok(())
    }

    #[test]
    fn blank_runs_and_crlf() -> Result<()> {
        let control = ControlFile::parse_str(
            "\r\n\r\nPackage: a\r\nVersion:  1 \r\n\r\n \r\n\r\nPackage: b\r\n",
        )?;

        let paragraphs = control.into_paragraphs().collect::<Vec<_>>();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].field_str("Version"), Some("1"));
        assert_eq!(paragraphs[1].field_str("Package"), Some("b"));

        Ok(())
    }

    #[test]
    fn reader_is_not_restartable() -> Result<()> {
        let mut reader = ControlParagraphReader::new(std::io::Cursor::new(b"A: 1\n\nB: 2"));

        assert_eq!(reader.next().unwrap()?.field_str("A"), Some("1"));
        assert_eq!(reader.next().unwrap()?.field_str("B"), Some("2"));
        assert!(reader.next().is_none());
        assert!(reader.next().is_none());

        Ok(())
    }

    #[test]
    fn field_accessors() -> Result<()> {
        let control = ControlFile::parse_str("Size: 1234\nBad: x\nList: a  b\tc\n")?;
        let p = control.paragraphs().next().unwrap();

        assert_eq!(p.field_u64("Size").unwrap()?, 1234);
        assert!(p.field_u64("Bad").unwrap().is_err());
        assert!(p.field_u64("Missing").is_none());
        assert_eq!(
            p.field_iter_value_words("List").unwrap().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn async_reader() -> Result<()> {
        let data = b"Package: one\nDescription: x\n y\n\nPackage: two\n".to_vec();
        let mut reader = ControlParagraphAsyncReader::new(futures::io::Cursor::new(data));

        let first = reader.read_paragraph().await?.unwrap();
        assert_eq!(first.field_str("Description"), Some("x\n y"));
        let second = reader.read_paragraph().await?.unwrap();
        assert_eq!(second.field_str("Package"), Some("two"));
        assert!(reader.read_paragraph().await?.is_none());

        Ok(())
    }
}
