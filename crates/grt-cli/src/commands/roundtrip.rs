//! `grt roundtrip`: unserialize a document and serialize it again.

use std::path::Path;

use anyhow::Context;

use super::Setup;

pub fn execute(setup: &Setup, file: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let grt = setup.context()?;
    let mut unserializer = grt.unserializer();
    let value = unserializer
        .load_from_xml(file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    let doctype = unserializer.document_type().to_string();
    let version = unserializer.document_version().to_string();

    match output {
        Some(path) => {
            grt.serialize(&value, path, &doctype, &version)
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(from = %file.display(), to = %path.display(), "document rewritten");
        }
        None => print!("{}", grt.serialize_to_string(&value, &doctype, &version)?),
    }
    Ok(())
}
