use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Recursively copies `src` into `dst`, creating `dst` and any missing parents.
pub fn copy_dir_all(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<()> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_all(entry.path(), target)?;
        } else if file_type.is_symlink() {
            let resolved = fs::read_link(entry.path())?;
            copy_symlink(&resolved, &target)?;
        } else {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(not(unix))]
fn copy_symlink(original: &Path, link: &Path) -> io::Result<()> {
    fs::copy(original, link).map(|_| ())
}

/// Names of the immediate subdirectories of `dir`.
pub fn subdirectory_names(dir: impl AsRef<Path>) -> io::Result<Vec<String>> {
    let mut names = vec![];
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}

/// Full paths of the immediate subdirectories of `dir`, sorted.
pub fn subdirectories(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut paths = subdirectory_names(dir)?
        .into_iter()
        .map(|name| dir.join(name))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

/// First line of a text file, without its line terminator.
pub fn read_first_line(path: impl AsRef<Path>) -> io::Result<Option<String>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .next()
        .map(|line| line.trim_end_matches('\r').to_string()))
}

#[cfg(unix)]
pub fn ensure_executable(path: impl AsRef<Path>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let path = path.as_ref();
    let mut permissions = fs::metadata(path)?.permissions();
    let mode = permissions.mode();
    if mode & 0o111 != 0o111 {
        permissions.set_mode(mode | 0o111);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_executable(_path: impl AsRef<Path>) -> io::Result<()> {
    Ok(())
}
