// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Static code screening.
//!
//! A cheap pre-execution pass over submitted source text. It is not a parser
//! and makes no soundness claim; the process sandbox is the actual isolation
//! boundary. Screening exists to reject obviously hostile submissions before
//! a unit is ever spawned, and every hit is a security violation.

use tracing::warn;

struct LanguageRules {
    blocked_modules: &'static [&'static str],
    blocked_patterns: &'static [&'static str],
}

const PYTHON_RULES: LanguageRules = LanguageRules {
    blocked_modules: &[
        "os",
        "sys",
        "subprocess",
        "multiprocessing",
        "threading",
        "socket",
        "urllib",
        "requests",
        "http",
        "ftplib",
        "smtplib",
        "pickle",
        "marshal",
        "ctypes",
        "mmap",
        "signal",
    ],
    blocked_patterns: &[
        "eval(",
        "exec(",
        "compile(",
        "__import__",
        "globals()",
        "locals()",
        "open(",
        "os.system",
        "subprocess.",
    ],
};

const JAVASCRIPT_RULES: LanguageRules = LanguageRules {
    blocked_modules: &["child_process", "fs", "net", "http", "https", "dns", "cluster"],
    blocked_patterns: &["eval(", "process.exit", "process.env", "Function("],
};

const SHELL_RULES: LanguageRules = LanguageRules {
    blocked_modules: &[],
    blocked_patterns: &["rm -rf /", "mkfs", "dd if=", ":(){"],
};

/// Stateless screening service.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeScreener;

impl CodeScreener {
    pub fn new() -> Self {
        Self
    }

    /// Screen `code` for the given language. Returns the list of violations;
    /// empty means the submission may proceed to the sandbox.
    pub fn screen(&self, language: &str, code: &str) -> Vec<String> {
        let rules = match language {
            "python" => &PYTHON_RULES,
            "javascript" | "typescript" => &JAVASCRIPT_RULES,
            "shell" | "sh" => &SHELL_RULES,
            // Unknown languages are rejected later by the interpreter
            // mapping; nothing to screen here.
            _ => return Vec::new(),
        };

        let mut violations = Vec::new();

        for module in rules.blocked_modules {
            if module_referenced(language, code, module) {
                violations.push(format!("blocked module import: {}", module));
            }
        }
        for pattern in rules.blocked_patterns {
            if code.contains(pattern) {
                violations.push(format!("dangerous pattern detected: {}", pattern));
            }
        }

        if !violations.is_empty() {
            warn!(
                language = language,
                violations = violations.len(),
                "code screening rejected submission"
            );
        }
        violations
    }
}

fn module_referenced(language: &str, code: &str, module: &str) -> bool {
    match language {
        "python" => {
            code.contains(&format!("import {}", module))
                || code.contains(&format!("from {}", module))
        }
        "javascript" | "typescript" => {
            code.contains(&format!("require('{}'", module))
                || code.contains(&format!("require(\"{}\"", module))
                || code.contains(&format!("from '{}'", module))
                || code.contains(&format!("from \"{}\"", module))
        }
        _ => false,
    }
}
