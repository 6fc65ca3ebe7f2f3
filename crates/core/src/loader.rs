use crate::error::LoadError;
use crate::models::{DocumentId, Segment};
use crate::traits::SegmentLoader;
use lopdf::Document;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["pdf", "docx", "txt", "md", "csv"];

/// Upper bound on the decompressed size of `word/document.xml`.
const MAX_DOCX_XML_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
struct LoadedDocument {
    path: PathBuf,
    document_id: DocumentId,
    segments: Vec<String>,
}

/// Default loader: reads files from disk and keeps their segments in memory.
#[derive(Debug, Default)]
pub struct FileSegmentLoader {
    documents: Vec<LoadedDocument>,
}

impl FileSegmentLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SegmentLoader for FileSegmentLoader {
    fn supported_extensions(&self) -> &[&'static str] {
        &SUPPORTED_EXTENSIONS
    }

    fn add(&mut self, path: &Path) -> Result<(), LoadError> {
        let document_id = document_id_for(path)?;
        let segments = read_segments(path)?;
        debug!(path = %path.display(), segments = segments.len(), "document loaded");

        let loaded = LoadedDocument {
            path: path.to_path_buf(),
            document_id,
            segments,
        };
        match self.documents.iter_mut().find(|document| document.path == path) {
            Some(existing) => *existing = loaded,
            None => self.documents.push(loaded),
        }
        Ok(())
    }

    fn remove(&mut self, path: &Path) {
        self.documents.retain(|document| document.path != path);
    }

    fn all_segments(&self) -> Vec<Segment> {
        self.documents
            .iter()
            .flat_map(|document| {
                document.segments.iter().map(|text| Segment {
                    document_id: document.document_id.clone(),
                    text: text.clone(),
                })
            })
            .collect()
    }

    fn document_ids(&self) -> Vec<DocumentId> {
        self.documents
            .iter()
            .map(|document| document.document_id.clone())
            .collect()
    }

    fn document_count(&self) -> usize {
        self.documents.len()
    }
}

pub fn document_id_for(path: &Path) -> Result<DocumentId, LoadError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| LoadError::InvalidName(path.display().to_string()))
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    extension_of(path).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Recursively lists supported documents under `folder`, sorted by path.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && is_supported(entry.path()) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

fn read_segments(path: &Path) -> Result<Vec<String>, LoadError> {
    let extension = extension_of(path).unwrap_or_default();
    match extension.as_str() {
        "pdf" => read_pdf_pages(path),
        "docx" => read_docx(path).map(|text| vec![text]),
        "txt" | "md" => read_utf8(path).map(|text| vec![text]),
        "csv" => read_utf8(path).map(|text| csv_rows(&text)),
        _ => Err(LoadError::Unsupported {
            path: path.to_path_buf(),
            extension,
        }),
    }
}

fn read_utf8(path: &Path) -> Result<String, LoadError> {
    let bytes = fs::read(path)?;
    String::from_utf8(bytes).map_err(|error| LoadError::corrupt(path, error))
}

fn read_pdf_pages(path: &Path) -> Result<Vec<String>, LoadError> {
    let document = Document::load(path).map_err(|error| LoadError::corrupt(path, error))?;

    let mut pages = Vec::new();
    for (page_no, _page_id) in document.get_pages() {
        let text = document
            .extract_text(&[page_no])
            .map_err(|error| LoadError::corrupt(path, error))?;

        if !text.trim().is_empty() {
            pages.push(text);
        }
    }

    if pages.is_empty() {
        return Err(LoadError::corrupt(path, "pdf had no readable page text"));
    }

    Ok(pages)
}

fn read_docx(path: &Path) -> Result<String, LoadError> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|error| LoadError::corrupt(path, error))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|error| LoadError::corrupt(path, error))?;

    let mut xml = Vec::new();
    entry
        .take(MAX_DOCX_XML_BYTES)
        .read_to_end(&mut xml)
        .map_err(|error| LoadError::corrupt(path, error))?;
    if xml.len() as u64 >= MAX_DOCX_XML_BYTES {
        return Err(LoadError::corrupt(path, "word/document.xml exceeds size limit"));
    }

    docx_paragraphs(&xml).map_err(|error| LoadError::corrupt(path, error))
}

/// Collects `w:t` runs, one line per `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(element) if element.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(text) if in_text => out.push_str(&text.unescape()?),
            Event::End(element) => match element.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out.trim_end().to_string())
}

/// One segment per data row, rendered as `header: value` lines.
fn csv_rows(text: &str) -> Vec<String> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let headers = match lines.next() {
        Some(header) => split_csv_line(header),
        None => return Vec::new(),
    };

    lines
        .map(|line| {
            split_csv_line(line)
                .into_iter()
                .enumerate()
                .map(|(column, value)| {
                    let header = headers.get(column).map(String::as_str).unwrap_or("");
                    format!("{}: {}", header.trim(), value.trim())
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect()
}

// Quoted fields may contain commas and doubled quotes; embedded newlines are not supported.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn text_files_load_as_one_segment() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("notes.txt");
        fs::write(&path, "hello world")?;

        let mut loader = FileSegmentLoader::new();
        loader.add(&path)?;

        assert_eq!(loader.document_count(), 1);
        assert_eq!(
            loader.all_segments(),
            vec![Segment {
                document_id: "notes.txt".to_string(),
                text: "hello world".to_string(),
            }]
        );
        Ok(())
    }

    #[test]
    fn remove_drops_stored_segments_and_ignores_unknown_paths(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let kept = dir.path().join("a.md");
        let dropped = dir.path().join("b.md");
        fs::write(&kept, "# a")?;
        fs::write(&dropped, "# b")?;

        let mut loader = FileSegmentLoader::new();
        loader.add(&kept)?;
        loader.add(&dropped)?;
        loader.remove(&dropped);
        loader.remove(&dir.path().join("missing.md"));

        assert_eq!(loader.document_ids(), vec!["a.md".to_string()]);
        Ok(())
    }

    #[test]
    fn unsupported_extension_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("image.png");
        fs::write(&path, [0u8, 1, 2])?;

        let mut loader = FileSegmentLoader::new();
        let result = loader.add(&path);

        assert!(matches!(result, Err(LoadError::Unsupported { .. })));
        assert_eq!(loader.document_count(), 0);
        Ok(())
    }

    #[test]
    fn invalid_utf8_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.txt");
        fs::write(&path, [0xffu8, 0xfe, 0xfd])?;

        let mut loader = FileSegmentLoader::new();
        assert!(matches!(loader.add(&path), Err(LoadError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn broken_pdf_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.pdf");
        fs::write(&path, b"%PDF-1.4\n%broken")?;

        let mut loader = FileSegmentLoader::new();
        assert!(matches!(loader.add(&path), Err(LoadError::Corrupt { .. })));
        Ok(())
    }

    #[test]
    fn docx_paragraph_text_is_extracted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("memo.docx");
        let mut writer = zip::ZipWriter::new(fs::File::create(&path)?);
        writer.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default(),
        )?;
        writer.write_all(
            br#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>First</w:t></w:r><w:r><w:t> line</w:t></w:r></w:p><w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p></w:body></w:document>"#,
        )?;
        writer.finish()?;

        let mut loader = FileSegmentLoader::new();
        loader.add(&path)?;

        let segments = loader.all_segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "First line\nSecond & last");
        Ok(())
    }

    #[test]
    fn docx_with_damaged_entry_data_is_corrupt() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("damaged.docx");
        let mut writer = zip::ZipWriter::new(fs::File::create(&path)?);
        writer.start_file(
            "word/document.xml",
            zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored),
        )?;
        writer.write_all(br#"<w:document xmlns:w="w"><w:p><w:t>Hello</w:t></w:p></w:document>"#)?;
        writer.finish()?;

        // directory stays intact, entry bytes no longer match their checksum
        let mut bytes = fs::read(&path)?;
        let at = bytes
            .windows(5)
            .position(|window| window == b"Hello")
            .ok_or("entry text not found")?;
        bytes[at] = b'J';
        fs::write(&path, bytes)?;

        let mut loader = FileSegmentLoader::new();
        assert!(matches!(loader.add(&path), Err(LoadError::Corrupt { .. })));
        assert_eq!(loader.document_count(), 0);
        Ok(())
    }

    #[test]
    fn csv_rows_become_segments() {
        let rows = csv_rows("name,city\nAda,\"London, UK\"\n\nLinus,Helsinki\n");
        assert_eq!(
            rows,
            vec![
                "name: Ada\ncity: London, UK".to_string(),
                "name: Linus\ncity: Helsinki".to_string(),
            ]
        );
    }

    #[test]
    fn discovery_is_recursive_and_filters_types() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let nested = dir.path().join("nested");
        fs::create_dir(&nested)?;
        fs::write(dir.path().join("a.txt"), "a")?;
        fs::write(nested.join("b.PDF"), "b")?;
        fs::write(nested.join("c.exe"), "c")?;

        let files = discover_documents(dir.path());
        assert_eq!(files.len(), 2);
        Ok(())
    }
}
