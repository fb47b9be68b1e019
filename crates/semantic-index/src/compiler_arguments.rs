//! Command-line surgery for indexing invocations: stripping the switches
//! that would produce build artifacts, appending the indexing flags, and
//! materialising output-file-maps and response files.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::Result;

/// Swift switches that produce build output and must not run during an
/// index-only invocation.
const SWIFT_FLAGS_TO_STRIP: &[&str] = &[
    "-c",
    "-disable-cmo",
    "-emit-dependencies",
    "-emit-module",
    "-emit-module-interface",
    "-emit-objc-header",
    "-incremental",
    "-no-color-diagnostics",
    "-parseable-output",
    "-save-temps",
    "-serialize-diagnostics",
    "-use-frontend-parseable-output",
    "-validate-clang-modules-once",
    "-whole-module-optimization",
];

/// Swift switches taking a value, in either `-flag value` or `-flag=value`
/// spelling.
const SWIFT_OPTIONS_TO_STRIP: &[&str] = &[
    "-clang-build-session-file",
    "-emit-module-path",
    "-emit-module-interface-path",
    "-emit-objc-header-path",
    "-emit-package-module-interface-path",
    "-emit-private-module-interface-path",
    "-num-threads",
    "-o",
    "-output-file-map",
];

const CLANG_FLAGS_TO_STRIP: &[&str] = &[
    "-M",
    "-MD",
    "-MMD",
    "-MG",
    "-MM",
    "-MV",
    "-MP",
    "-MJ",
    "-c",
    "-fmodules-validate-once-per-build-session",
];

/// Clang dependency-file options taking a value, also in the joined
/// `-MFfile` spelling.
const CLANG_JOINED_OPTIONS_TO_STRIP: &[&str] = &["-MT", "-MF", "-MQ"];

/// Extra Clang arguments that make indexing resilient against ongoing
/// edits.
const SUPPLEMENTAL_CLANG_INDEXING_ARGUMENTS: &[&str] = &[
    "-fretain-comments-from-system-headers",
    "-Xclang",
    "-detailed-preprocessing-record",
    "-Xclang",
    "-fmodule-format=raw",
    "-Xclang",
    "-fallow-pch-with-compiler-errors",
    "-Xclang",
    "-fallow-pcm-with-compiler-errors",
    "-Wno-non-modular-include-in-framework-module",
    "-Wno-incomplete-umbrella",
    "-fmodules-validate-system-headers",
];

pub(crate) fn strip_swift_build_arguments(arguments: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(arguments.len());
    let mut iter = arguments.iter();
    while let Some(argument) = iter.next() {
        if SWIFT_FLAGS_TO_STRIP.contains(&argument.as_str()) {
            continue;
        }
        if SWIFT_OPTIONS_TO_STRIP.iter().any(|option| argument.as_str() == *option) {
            iter.next();
            continue;
        }
        if SWIFT_OPTIONS_TO_STRIP
            .iter()
            .any(|option| is_equals_spelling(argument, option))
        {
            continue;
        }
        result.push(argument.clone());
    }
    result
}

pub(crate) fn strip_clang_build_arguments(arguments: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(arguments.len());
    let mut iter = arguments.iter();
    while let Some(argument) = iter.next() {
        if CLANG_FLAGS_TO_STRIP.contains(&argument.as_str()) {
            continue;
        }
        if argument == "-serialize-diagnostics" || argument == "--serialize-diagnostics" {
            iter.next();
            continue;
        }
        if CLANG_JOINED_OPTIONS_TO_STRIP.contains(&argument.as_str()) {
            iter.next();
            continue;
        }
        if CLANG_JOINED_OPTIONS_TO_STRIP
            .iter()
            .any(|option| argument.len() > option.len() && argument.starts_with(option))
        {
            continue;
        }
        if argument.starts_with("-fbuild-session-file=") {
            continue;
        }
        result.push(argument.clone());
    }
    result
}

fn is_equals_spelling(argument: &str, option: &str) -> bool {
    argument
        .strip_prefix(option)
        .is_some_and(|suffix| suffix.starts_with('='))
}

/// The flags appended to every Swift indexing invocation after the
/// per-partition file arguments.
pub(crate) fn supplemental_swift_indexing_arguments() -> Vec<String> {
    let mut arguments = vec![
        "-Xfrontend".to_string(),
        "-experimental-allow-module-with-compiler-errors".to_string(),
        "-Xfrontend".to_string(),
        "-empty-abi-descriptor".to_string(),
    ];
    for clang_argument in SUPPLEMENTAL_CLANG_INDEXING_ARGUMENTS {
        arguments.push("-Xcc".to_string());
        arguments.push((*clang_argument).to_string());
    }
    arguments
}

pub(crate) fn supplemental_clang_indexing_arguments() -> Vec<String> {
    SUPPLEMENTAL_CLANG_INDEXING_ARGUMENTS.iter().map(|argument| (*argument).to_string()).collect()
}

/// Makes sure `arguments` contains exactly one `-index-store-path` pointing
/// at `index_store_path`. A conflicting value from the build settings is
/// overridden: units must land in the store the index database watches.
pub(crate) fn set_index_store_path(arguments: &mut Vec<String>, index_store_path: &Path) {
    let desired = index_store_path.to_string_lossy().to_string();
    let mut index = 0;
    let mut seen = false;
    while index < arguments.len() {
        if arguments[index] != "-index-store-path" {
            index += 1;
            continue;
        }
        if seen || index + 1 >= arguments.len() {
            // Duplicate or value-less occurrence.
            arguments.drain(index..(index + 2).min(arguments.len()));
            continue;
        }
        if arguments[index + 1] != desired {
            tracing::info!(
                "overriding index store path {} from the build settings with {}",
                arguments[index + 1],
                desired
            );
            arguments[index + 1] = desired.clone();
        }
        seen = true;
        index += 2;
    }
    if !seen {
        arguments.push("-index-store-path".to_string());
        arguments.push(desired);
    }
}

/// Removes `-index-unit-output-path <value>` pairs. Build settings are
/// grouped for multi-file indexing by equality after this normalization,
/// because the output path necessarily differs per file.
pub(crate) fn remove_index_unit_output_path(arguments: &[String]) -> Vec<String> {
    let mut result = Vec::with_capacity(arguments.len());
    let mut iter = arguments.iter();
    while let Some(argument) = iter.next() {
        if argument == "-index-unit-output-path" {
            iter.next();
            continue;
        }
        result.push(argument.clone());
    }
    result
}

/// Writes an output-file-map temp file mapping each absolute source path to
/// its index-unit output path. The file lives as long as the returned
/// handle, which the caller keeps for the duration of the compiler
/// invocation.
pub(crate) fn write_output_file_map(
    unit_output_paths_by_file: &BTreeMap<String, String>,
) -> Result<NamedTempFile> {
    let mut map = serde_json::Map::new();
    for (file, unit_output_path) in unit_output_paths_by_file {
        let mut entry = serde_json::Map::new();
        entry.insert(
            "index-unit-output-path".to_string(),
            serde_json::Value::String(unit_output_path.clone()),
        );
        map.insert(file.clone(), serde_json::Value::Object(entry));
    }
    let mut file = tempfile::Builder::new()
        .prefix("output-file-map-")
        .suffix(".json")
        .tempfile()?;
    serde_json::to_writer(&mut file, &serde_json::Value::Object(map))?;
    file.flush()?;
    Ok(file)
}

/// Writes a `@response_file` for command lines that exceed the OS's
/// argument size limit, one shell-quoted argument per line.
pub(crate) fn write_response_file(arguments: &[String]) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("index-arguments-")
        .suffix(".resp")
        .tempfile()?;
    for argument in arguments {
        writeln!(file, "{}", shell_quote(argument))?;
    }
    file.flush()?;
    Ok(file)
}

fn shell_quote(argument: &str) -> String {
    if !argument.is_empty()
        && argument
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'/' | b'=' | b'@' | b'+' | b':' | b','))
    {
        return argument.to_string();
    }
    let mut quoted = String::with_capacity(argument.len() + 2);
    quoted.push('"');
    for character in argument.chars() {
        if character == '"' || character == '\\' {
            quoted.push('\\');
        }
        quoted.push(character);
    }
    quoted.push('"');
    quoted
}

/// Whether spawning failed because the command line exceeded the OS limit.
pub(crate) fn is_argument_list_too_long(error: &std::io::Error) -> bool {
    #[cfg(unix)]
    {
        error.raw_os_error() == Some(libc::E2BIG)
    }
    #[cfg(windows)]
    {
        // ERROR_FILENAME_EXCED_RANGE; CreateProcess reports over-long
        // command lines with it.
        error.raw_os_error() == Some(206)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = error;
        false
    }
}
