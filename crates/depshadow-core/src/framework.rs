//! Target framework monikers as they appear in package manifests.

/// Convert a manifest framework name (`.NETStandard2.0`,
/// `.NETFramework,Version=v4.7.2`) into its short folder name
/// (`netstandard2.0`, `net472`). Names that are already short pass through
/// lower-cased; an empty or `any` framework becomes `""`.
pub fn short_folder_name(target_framework: &str) -> String {
    let tfm = target_framework.trim();
    if tfm.is_empty() || tfm.eq_ignore_ascii_case("any") {
        return String::new();
    }

    let lower = tfm
        .to_ascii_lowercase()
        .replace(",version=v", "")
        .replace(",version=", "");
    let (name, profile) = match lower.split_once('-') {
        Some((name, profile)) => (name, Some(profile)),
        None => (lower.as_str(), None),
    };

    let short = if let Some(version) = strip_identifier(name, "netstandard") {
        format!("netstandard{}", dotted(version))
    } else if let Some(version) = strip_identifier(name, "netcoreapp") {
        if major(version) >= 5 {
            format!("net{}", dotted(version))
        } else {
            format!("netcoreapp{}", dotted(version))
        }
    } else if let Some(version) = name.strip_prefix(".netframework") {
        format!("net{}", version.trim_start_matches('v').replace('.', ""))
    } else {
        return lower;
    };

    match profile {
        Some(profile) if !profile.is_empty() => format!("{}-{}", short, profile),
        _ => short,
    }
}

/// Accepts both the dotted long form (`.netstandard`) and the bare one.
fn strip_identifier<'a>(name: &'a str, identifier: &str) -> Option<&'a str> {
    let name = name.strip_prefix('.').unwrap_or(name);
    name.strip_prefix(identifier)
        .map(|version| version.trim_start_matches('v'))
}

/// `2` -> `2.0`; already dotted versions are kept.
fn dotted(version: &str) -> String {
    if version.contains('.') || version.is_empty() {
        version.to_string()
    } else {
        format!("{}.0", version)
    }
}

fn major(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|m| m.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::short_folder_name;

    #[test]
    fn converts_long_names() {
        assert_eq!(short_folder_name(".NETStandard2.0"), "netstandard2.0");
        assert_eq!(short_folder_name(".NETStandard1.3"), "netstandard1.3");
        assert_eq!(short_folder_name(".NETFramework4.7.2"), "net472");
        assert_eq!(short_folder_name(".NETFramework4.5"), "net45");
        assert_eq!(short_folder_name(".NETFramework,Version=v4.6.1"), "net461");
        assert_eq!(short_folder_name(".NETCoreApp3.1"), "netcoreapp3.1");
        assert_eq!(short_folder_name(".NETCoreApp5.0"), "net5.0");
    }

    #[test]
    fn keeps_short_names() {
        assert_eq!(short_folder_name("net6.0"), "net6.0");
        assert_eq!(short_folder_name("net472"), "net472");
        assert_eq!(short_folder_name("netstandard2.1"), "netstandard2.1");
        assert_eq!(short_folder_name("net8.0-windows"), "net8.0-windows");
        assert_eq!(short_folder_name("NETStandard2.0"), "netstandard2.0");
    }

    #[test]
    fn empty_and_any_mean_every_framework() {
        assert_eq!(short_folder_name(""), "");
        assert_eq!(short_folder_name("  "), "");
        assert_eq!(short_folder_name("Any"), "");
    }

    #[test]
    fn unknown_identifiers_are_lowercased() {
        assert_eq!(short_folder_name("MonoAndroid10"), "monoandroid10");
    }
}
