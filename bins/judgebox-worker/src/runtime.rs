/// Language → runtime table
///
/// Each language runs from a stock interpreter image, with the submission
/// passed inline through the interpreter's "run this string" flag. Nothing is
/// written to disk inside the container.

use judgebox_common::types::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime {
    pub image: &'static str,
    pub program: &'static str,
    pub inline_flag: &'static str,
}

pub fn runtime_for(language: Language) -> Runtime {
    let (image, program, inline_flag) = match language {
        Language::NodeJs => ("node:20-alpine", "node", "-e"),
        Language::Python => ("python:3.11-alpine", "python3", "-c"),
        Language::Python2 => ("python:2.7-alpine", "python2", "-c"),
        Language::Ruby => ("ruby:3.2-alpine", "ruby", "-e"),
        Language::Php => ("php:8.2-alpine", "php", "-r"),
        Language::Perl => ("perl:5.38-slim", "perl", "-e"),
        Language::Lua => ("nickblah/lua:5.4-alpine", "lua", "-e"),
    };

    Runtime {
        image,
        program,
        inline_flag,
    }
}

impl Runtime {
    /// argv for running `code`, e.g. `["python3", "-c", code]`
    pub fn command(&self, code: &str) -> Vec<String> {
        vec![
            self.program.to_string(),
            self.inline_flag.to_string(),
            code.to_string(),
        ]
    }
}

/// Every image the worker may need, for pre-pulling at startup
pub fn all_images() -> Vec<&'static str> {
    Language::all_variants()
        .iter()
        .map(|lang| runtime_for(*lang).image)
        .collect()
}
