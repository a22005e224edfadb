use std::path::{Path, PathBuf};

use anyhow::Context;
use dotpatch::Module;

/// Load a module image.
pub fn load_module(path: &Path) -> anyhow::Result<Module> {
    Module::from_file(path).with_context(|| format!("failed to load module: {}", path.display()))
}

/// Expand the given paths into module files: files are kept as given, directories are
/// searched recursively. Directory results are sorted; the overall order follows `paths`.
pub fn collect_modules(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            collect_modules_recursive(path, &mut found)?;
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

fn collect_modules_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_modules_recursive(&path, files)?;
        } else if is_module_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Returns true if the path has a `.dll` or `.exe` extension.
pub fn is_module_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("dll" | "exe")
    )
}
