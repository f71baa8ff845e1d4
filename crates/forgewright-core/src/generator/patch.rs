//! Applying a [`GeneratedFile`] list to a working directory.
//!
//! `create` files are written as-is. `modify` files are patched by exact
//! search/replace: each patch's `search` text must appear in the file
//! exactly once for it to be applied. Zero matches or more than one match
//! are both refused rather than guessed at -- a generator that produced an
//! ambiguous or stale patch should be told to retry, not have its change
//! silently mis-applied.

use std::path::Path;

use anyhow::{Context, Result};

use super::{GeneratedFile, SearchReplace};

/// Per-file result of applying a single [`GeneratedFile`] entry.
#[derive(Debug, Clone)]
pub enum PatchOutcome {
    Created { path: String },
    Modified { path: String, patches_applied: usize },
    Refused { path: String, reason: String },
}

/// Apply every entry in `files` under `working_dir`, returning one outcome
/// per entry in order. A refused entry does not stop the others from being
/// attempted -- the coordinator decides whether any refusal is fatal to the
/// attempt.
pub fn apply_generated_files(working_dir: &Path, files: &[GeneratedFile]) -> Result<Vec<PatchOutcome>> {
    files.iter().map(|file| apply_one(working_dir, file)).collect()
}

fn apply_one(working_dir: &Path, file: &GeneratedFile) -> Result<PatchOutcome> {
    match file {
        GeneratedFile::Create { path, content } => {
            let target = working_dir.join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create parent directory for {path}"))?;
            }
            std::fs::write(&target, content).with_context(|| format!("failed to write {path}"))?;
            Ok(PatchOutcome::Created { path: path.clone() })
        }
        GeneratedFile::Modify { path, patches } => {
            let target = working_dir.join(path);
            let original = std::fs::read_to_string(&target)
                .with_context(|| format!("failed to read {path} for patching"))?;

            match apply_patches(&original, patches) {
                Ok(patched) => {
                    std::fs::write(&target, patched)
                        .with_context(|| format!("failed to write patched {path}"))?;
                    Ok(PatchOutcome::Modified {
                        path: path.clone(),
                        patches_applied: patches.len(),
                    })
                }
                Err(reason) => Ok(PatchOutcome::Refused {
                    path: path.clone(),
                    reason,
                }),
            }
        }
    }
}

/// Apply each patch in order against `content`. Fails the whole file on the
/// first patch whose `search` text doesn't appear exactly once.
fn apply_patches(content: &str, patches: &[SearchReplace]) -> Result<String, String> {
    let mut current = content.to_string();
    for (i, patch) in patches.iter().enumerate() {
        let matches = current.matches(patch.search.as_str()).count();
        match matches {
            0 => return Err(format!("patch {i}: search text not found")),
            1 => {
                current = current.replacen(&patch.search, &patch.replace, 1);
            }
            n => return Err(format!("patch {i}: search text matched {n} times, expected exactly 1")),
        }
    }
    Ok(current)
}
