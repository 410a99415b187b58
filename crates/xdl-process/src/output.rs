//! Packager output classification.
//!
//! Provides a line-by-line state machine that decides what happens to every
//! line the packager writes: forwarded to the project log at a level,
//! suppressed, or turned into a watchman recovery request. Multi-line
//! `jest-haste-map` collision blocks are buffered until they complete so the
//! benign ones (paths under `ios/Pods/`) can be dropped as a unit.

use regex::Regex;
use xdl_core::prelude::*;
use xdl_core::LogLevel;

/// Header line of a duplicate-module warning block
pub const COLLISION_HEADER: &str = "jest-haste-map: @providesModule naming collision:";

/// Trailer line printed after a collision block
const COLLISION_TRAILER: &str = "This warning is caused by a @providesModule declaration";

/// Path fragment marking a collision as coming from CocoaPods copies
const PODS_PATH: &str = "ios/Pods/";

/// Hint the packager prints when watchman's view is stale
pub const WATCHMAN_HINT: &str = "watchman watch-del";

/// Maximum lines to buffer in a collision block before force-completing
const MAX_BLOCK_LINES: usize = 200;

/// Default patterns for lines that are never shown (the startup box banner)
pub const DEFAULT_SUPPRESS_PATTERNS: &[&str] = &[r"^\s*[┌└│╭╰║╔╚]"];

/// Default patterns for lines demoted to debug
pub const DEFAULT_DEBUG_PATTERNS: &[&str] = &[r"Scanning folders for symlinks"];

// ─────────────────────────────────────────────────────────────────────────────
// Types
// ─────────────────────────────────────────────────────────────────────────────

/// Which pipe a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    fn level(self) -> LogLevel {
        match self {
            Stream::Stdout => LogLevel::Info,
            Stream::Stderr => LogLevel::Error,
        }
    }
}

/// What to do with classified output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputAction {
    /// Forward to the project log tagged `packager`
    Log { level: LogLevel, line: String },
    /// Watchman needs its watch recreated for the project root
    WatchmanRecrawl,
}

/// Configurable matchers for the classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPatterns {
    pub suppress: Vec<String>,
    pub debug: Vec<String>,
}

impl Default for OutputPatterns {
    fn default() -> Self {
        Self {
            suppress: DEFAULT_SUPPRESS_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            debug: DEFAULT_DEBUG_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClassifierState {
    Idle,
    InCollision,
}

// ─────────────────────────────────────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────────────────────────────────────

/// Line-by-line classifier for packager output
#[derive(Debug)]
pub struct OutputClassifier {
    state: ClassifierState,
    block: Vec<(Stream, String)>,
    suppress: Vec<Regex>,
    debug: Vec<Regex>,
}

impl OutputClassifier {
    pub fn new(patterns: &OutputPatterns) -> Result<Self> {
        Ok(Self {
            state: ClassifierState::Idle,
            block: Vec::new(),
            suppress: compile(&patterns.suppress)?,
            debug: compile(&patterns.debug)?,
        })
    }

    /// Feed one line and get the resulting actions (possibly none while buffering).
    pub fn feed(&mut self, stream: Stream, line: &str) -> Vec<OutputAction> {
        match self.state {
            ClassifierState::Idle => {
                if line.contains(COLLISION_HEADER) {
                    self.state = ClassifierState::InCollision;
                    self.block.push((stream, line.to_string()));
                    return Vec::new();
                }
                self.classify_line(stream, line)
            }
            ClassifierState::InCollision => {
                if line.trim().is_empty() || line.contains(COLLISION_TRAILER) {
                    self.block.push((stream, line.to_string()));
                    return self.complete_block();
                }
                if line.contains(COLLISION_HEADER) {
                    let actions = self.complete_block();
                    self.state = ClassifierState::InCollision;
                    self.block.push((stream, line.to_string()));
                    return actions;
                }
                self.block.push((stream, line.to_string()));
                if self.block.len() >= MAX_BLOCK_LINES {
                    return self.complete_block();
                }
                Vec::new()
            }
        }
    }

    /// Flush a partially buffered block, e.g. when the process exits
    pub fn flush(&mut self) -> Vec<OutputAction> {
        if self.block.is_empty() {
            return Vec::new();
        }
        self.complete_block()
    }

    fn complete_block(&mut self) -> Vec<OutputAction> {
        self.state = ClassifierState::Idle;
        let block = std::mem::take(&mut self.block);

        if block.iter().any(|(_, l)| l.contains(PODS_PATH)) {
            trace!("Suppressed {} line collision block from ios/Pods", block.len());
            return Vec::new();
        }

        block
            .into_iter()
            .filter(|(_, l)| !l.trim().is_empty())
            .map(|(stream, line)| OutputAction::Log {
                level: stream.level(),
                line,
            })
            .collect()
    }

    fn classify_line(&self, stream: Stream, line: &str) -> Vec<OutputAction> {
        if self.suppress.iter().any(|re| re.is_match(line)) {
            return Vec::new();
        }

        let level = if self.debug.iter().any(|re| re.is_match(line)) {
            LogLevel::Debug
        } else {
            stream.level()
        };

        let mut actions = vec![OutputAction::Log {
            level,
            line: line.to_string(),
        }];
        if line.contains(WATCHMAN_HINT) {
            actions.push(OutputAction::WatchmanRecrawl);
        }
        actions
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::config_invalid(format!("bad output pattern {p:?}: {e}")))
        })
        .collect()
}
