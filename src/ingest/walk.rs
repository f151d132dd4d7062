use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Files larger than this are skipped.
const MAX_FILE_BYTES: u64 = 1_048_576;

/// A document loaded from a source directory
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    pub relative_path: String,
    pub content: String,
    pub kind: String,
}

/// Walk all text documents under `dir` and return their contents.
pub fn walk_documents(dir: &Path) -> Result<Vec<LoadedDocument>> {
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }
    tracing::info!("Loading documents from {}", dir.display());

    let mut docs = Vec::new();

    for entry in WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden_or_ignored(e))
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        if !is_loadable_file(path) {
            continue;
        }

        if let Ok(meta) = entry.metadata() {
            if meta.len() > MAX_FILE_BYTES {
                tracing::debug!("Skipping large file {}", path.display());
                continue;
            }
        }

        let relative = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string();

        match std::fs::read_to_string(path) {
            Ok(content) => docs.push(LoadedDocument {
                relative_path: relative,
                kind: detect_kind(path),
                content,
            }),
            // Not UTF-8
            Err(_) => continue,
        }
    }

    docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    tracing::info!("Loaded {} documents from {}", docs.len(), dir.display());
    Ok(docs)
}

/// Wrap a pasted text as a single document.
pub fn text_document(name: &str, content: &str) -> Result<LoadedDocument> {
    if content.trim().is_empty() {
        anyhow::bail!("Text source is empty");
    }
    Ok(LoadedDocument {
        relative_path: name.to_string(),
        content: content.to_string(),
        kind: "text".to_string(),
    })
}

/// Canonicalize a user-supplied directory path.
pub fn resolve_dir(path: &Path) -> Result<std::path::PathBuf> {
    let resolved = path
        .canonicalize()
        .with_context(|| format!("Cannot access {}", path.display()))?;
    if !resolved.is_dir() {
        anyhow::bail!("{} is not a directory", resolved.display());
    }
    Ok(resolved)
}

fn is_hidden_or_ignored(entry: &walkdir::DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    matches!(
        name.as_ref(),
        "node_modules" | "target" | "dist" | "build" | "__pycache__" | "vendor" | "venv" | "env"
    )
}

fn is_loadable_file(path: &Path) -> bool {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let filename = path
        .file_name()
        .map(|f| f.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if matches!(filename.as_ref(), "readme" | "license" | "changelog" | "notice") {
        return true;
    }

    matches!(
        ext.as_str(),
        "md" | "markdown"
            | "mdx"
            | "rst"
            | "txt"
            | "text"
            | "adoc"
            | "org"
            | "tex"
            | "html"
            | "htm"
            | "xml"
            | "json"
            | "jsonl"
            | "csv"
            | "tsv"
            | "yaml"
            | "yml"
            | "toml"
            | "ini"
            | "rs"
            | "py"
            | "js"
            | "ts"
            | "go"
            | "java"
            | "c"
            | "cpp"
            | "h"
            | "hpp"
            | "cu"
            | "sh"
            | "sql"
    )
}

fn detect_kind(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "md" | "markdown" | "mdx" => "markdown",
        "rst" => "restructuredtext",
        "adoc" => "asciidoc",
        "html" | "htm" => "html",
        "xml" => "xml",
        "json" | "jsonl" => "json",
        "csv" | "tsv" => "table",
        "yaml" | "yml" | "toml" | "ini" => "config",
        "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "hpp" | "cu" | "sh"
        | "sql" => "code",
        _ => "text",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_walk_skips_hidden_and_binary() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("guide.md"), "# Guide\nUse the reranker.").unwrap();
        std::fs::write(dir.path().join("image.png"), [0u8, 159, 146, 150]).unwrap();
        std::fs::create_dir(dir.path().join(".cache")).unwrap();
        std::fs::write(dir.path().join(".cache/notes.txt"), "hidden").unwrap();
        std::fs::create_dir(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg.txt"), "vendored").unwrap();

        let docs = walk_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative_path, "guide.md");
        assert_eq!(docs[0].kind, "markdown");
    }

    #[test]
    fn test_walk_skips_non_utf8() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.txt"), [0xffu8, 0xfe, 0xfd]).unwrap();
        std::fs::write(dir.path().join("good.txt"), "ok").unwrap();

        let docs = walk_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative_path, "good.txt");
    }

    #[test]
    fn test_walk_sorted_and_nested() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.rst"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let docs = walk_documents(dir.path()).unwrap();
        let paths: Vec<&str> = docs.iter().map(|d| d.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "sub/b.rst"]);
        assert_eq!(docs[1].kind, "restructuredtext");
    }

    #[test]
    fn test_walk_rejects_file_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("single.txt");
        std::fs::write(&file, "x").unwrap();
        assert!(walk_documents(&file).is_err());
    }

    #[test]
    fn test_text_document_rejects_blank() {
        assert!(text_document("note", "   ").is_err());
        let doc = text_document("note", "hello").unwrap();
        assert_eq!(doc.kind, "text");
        assert_eq!(doc.relative_path, "note");
    }
}
