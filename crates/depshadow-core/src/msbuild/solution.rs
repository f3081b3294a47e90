//! Project lists from `.sln` and `.slnx` solution files.

use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};
use crate::xml::{parse_document, Element};

const SOLUTION_FOLDER_TYPE: &str = "2150E333-8FDC-42A3-9474-1A3956D46DE8";

/// Absolute paths of the MSBuild projects a solution lists, sorted and
/// without duplicates. Solution folders and non-project entries are skipped.
pub async fn read_solution(path: &Path) -> Result<Vec<PathBuf>> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io("read solution", path, e))?;
    let dir = path.parent().unwrap_or(Path::new(""));
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let relative = match extension.as_str() {
        "sln" => parse_sln(&text),
        "slnx" => parse_slnx(&text, path)?,
        _ => {
            return Err(Error::Solution {
                path: path.to_path_buf(),
                message: "expected a .sln or .slnx file".to_string(),
            })
        }
    };

    let mut projects: Vec<PathBuf> = relative
        .iter()
        .filter(|p| is_msbuild_project(p))
        .map(|p| normalize(&dir.join(p.replace('\\', "/"))))
        .collect();
    projects.sort();
    projects.dedup();
    Ok(projects)
}

/// Relative project paths from `Project("{type}") = "Name", "path", "{guid}"` lines.
pub fn parse_sln(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let rest = line.strip_prefix("Project(")?;
            let (kind, rest) = rest.split_once(')')?;
            if kind.to_ascii_uppercase().contains(SOLUTION_FOLDER_TYPE) {
                return None;
            }
            let (_, values) = rest.split_once('=')?;
            let quoted: Vec<&str> = values.split(',').map(|v| v.trim().trim_matches('"')).collect();
            quoted.get(1).map(|p| p.to_string())
        })
        .collect()
}

/// Relative project paths from every `<Project Path="...">` in an XML solution.
pub fn parse_slnx(text: &str, path: &Path) -> Result<Vec<String>> {
    let root = parse_document(text, Some(path))?;
    if !root.is("Solution") {
        return Err(Error::Solution {
            path: path.to_path_buf(),
            message: "root element is not <Solution>".to_string(),
        });
    }
    let mut found = Vec::new();
    collect_projects(&root, &mut found);
    Ok(found)
}

fn collect_projects(element: &Element, found: &mut Vec<String>) {
    for child in &element.children {
        if child.is("Project") {
            if let Some(path) = child.attr("Path") {
                found.push(path.to_string());
            }
        }
        collect_projects(child, found);
    }
}

/// `*.??proj` files, minus the setup projects that MSBuild cannot load.
fn is_msbuild_project(path: &str) -> bool {
    Path::new(&path.replace('\\', "/"))
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .is_some_and(|e| e.ends_with("proj") && e != "vdproj")
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLN: &str = r#"
Microsoft Visual Studio Solution File, Format Version 12.00
# Visual Studio Version 17
Project("{2150E333-8FDC-42A3-9474-1A3956D46DE8}") = "src", "src", "{11111111-1111-1111-1111-111111111111}"
EndProject
Project("{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}") = "Web", "src\Web\Web.csproj", "{22222222-2222-2222-2222-222222222222}"
EndProject
Project("{F2A71F9B-5D33-465A-A702-920D77279786}") = "Core", "src\Core\Core.fsproj", "{33333333-3333-3333-3333-333333333333}"
EndProject
Project("{2150E333-8FDC-42A3-9474-1A3956D46DE8}") = "Solution Items", "Solution Items", "{44444444-4444-4444-4444-444444444444}"
EndProject
Project("{54435603-DBB4-11D2-8724-00A0C9A8B90C}") = "Setup", "setup\Setup.vdproj", "{55555555-5555-5555-5555-555555555555}"
EndProject
Project("{FAE04EC0-301F-11D3-BF4B-00C04F79EFBC}") = "Web", "src\Web\Web.csproj", "{22222222-2222-2222-2222-222222222222}"
EndProject
"#;

    #[test]
    fn parses_sln_project_lines() {
        let paths = parse_sln(SLN);
        assert_eq!(
            paths,
            vec![
                "src\\Web\\Web.csproj",
                "src\\Core\\Core.fsproj",
                "setup\\Setup.vdproj",
                "src\\Web\\Web.csproj",
            ]
        );
    }

    #[tokio::test]
    async fn reads_sln_sorted_and_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("All.sln");
        std::fs::write(&path, SLN).unwrap();

        let projects = read_solution(&path).await.unwrap();
        assert_eq!(
            projects,
            vec![
                dir.path().join("src/Core/Core.fsproj"),
                dir.path().join("src/Web/Web.csproj"),
            ]
        );
    }

    #[tokio::test]
    async fn reads_slnx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("All.slnx");
        std::fs::write(
            &path,
            r#"<Solution>
  <Folder Name="/src/">
    <Project Path="src/Lib/Lib.csproj" />
    <File Path="README.md" />
  </Folder>
  <Project Path="./App/App.vbproj" />
  <Project Path="docs/notes.md" />
</Solution>"#,
        )
        .unwrap();

        let projects = read_solution(&path).await.unwrap();
        assert_eq!(
            projects,
            vec![
                dir.path().join("App/App.vbproj"),
                dir.path().join("src/Lib/Lib.csproj"),
            ]
        );
    }

    #[tokio::test]
    async fn rejects_other_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("All.txt");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            read_solution(&path).await,
            Err(Error::Solution { .. })
        ));
    }

    #[test]
    fn normalizes_parent_components() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d.csproj")),
            PathBuf::from("/a/c/d.csproj")
        );
    }
}
