#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use smartprog_lib::{
    BootTiming, BootloaderController, EsptoolConfig, Flasher, Level, OutputLine, ProgressCallback,
    ToolCommand, ToolExit, ToolRunner,
};
use tempfile::TempDir;

pub const VERSION: &str = "2.0.47";
pub const VARIANT_FILE: &str = "battery_sw_a_0x9000.bin";
pub const FULL_SET: [&str; 5] = [
    "bootloader_0x1000.bin",
    "app_0x10000.bin",
    "partition-table_0x8000.bin",
    "ota_data_initial_0xe000.bin",
    VARIANT_FILE,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Pin(&'static str, Level),
    Tool(String),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

pub fn clear(log: &EventLog) {
    log.lock().unwrap().clear();
}

pub fn tool_calls(log: &EventLog) -> Vec<String> {
    events(log)
        .into_iter()
        .filter_map(|e| match e {
            Event::Tool(label) => Some(label),
            Event::Pin(..) => None,
        })
        .collect()
}

pub fn pin_events(log: &EventLog) -> Vec<Event> {
    events(log)
        .into_iter()
        .filter(|e| matches!(e, Event::Pin(..)))
        .collect()
}

pub fn enter_sequence() -> Vec<Event> {
    vec![
        Event::Pin("BOOT", Level::Low),
        Event::Pin("EN", Level::Low),
        Event::Pin("EN", Level::High),
    ]
}

pub fn exit_sequence() -> Vec<Event> {
    vec![
        Event::Pin("BOOT", Level::High),
        Event::Pin("EN", Level::Low),
        Event::Pin("EN", Level::High),
    ]
}

/// Number of non-overlapping occurrences of `pattern` in `events`.
pub fn count_sequence(events: &[Event], pattern: &[Event]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i + pattern.len() <= events.len() {
        if events[i..i + pattern.len()] == *pattern {
            count += 1;
            i += pattern.len();
        } else {
            i += 1;
        }
    }
    count
}

pub struct RecordingLine {
    name: &'static str,
    log: EventLog,
}

impl RecordingLine {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            log: Arc::clone(log),
        }
    }
}

impl OutputLine for RecordingLine {
    fn set_level(&mut self, level: Level) {
        self.log.lock().unwrap().push(Event::Pin(self.name, level));
    }

    fn name(&self) -> String {
        self.name.to_string()
    }
}

#[derive(Debug, Clone)]
struct Reply {
    code: Option<i32>,
    lines: Vec<String>,
}

/// Tool runner that answers from a script keyed by subcommand and records
/// every invocation.
pub struct ScriptedRunner {
    log: EventLog,
    replies: HashMap<String, Reply>,
    pub commands: Arc<Mutex<Vec<ToolCommand>>>,
}

impl ScriptedRunner {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: Arc::clone(log),
            replies: HashMap::new(),
            commands: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reply(mut self, subcommand: &str, code: i32, lines: &[&str]) -> Self {
        self.replies.insert(
            subcommand.to_string(),
            Reply {
                code: Some(code),
                lines: lines.iter().map(|l| l.to_string()).collect(),
            },
        );
        self
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(
        &mut self,
        command: &ToolCommand,
        on_line: &mut dyn FnMut(&str),
    ) -> smartprog_lib::Result<ToolExit> {
        let label = command.label();
        self.log.lock().unwrap().push(Event::Tool(label.clone()));
        self.commands.lock().unwrap().push(command.clone());

        let reply = self
            .replies
            .iter()
            .find(|(sub, _)| label.ends_with(sub.as_str()))
            .map(|(_, reply)| reply.clone())
            .unwrap_or(Reply {
                code: Some(0),
                lines: Vec::new(),
            });
        for line in &reply.lines {
            on_line(line);
        }
        Ok(ToolExit { code: reply.code })
    }
}

pub type TestFlasher = Flasher<RecordingLine, ScriptedRunner>;

/// Flasher on recording lines with no delays. The construction-time pin
/// writes are cleared from the log.
pub fn flasher(log: &EventLog, runner: ScriptedRunner) -> TestFlasher {
    let bootloader = BootloaderController::with_timing(
        RecordingLine::new("BOOT", log),
        RecordingLine::new("EN", log),
        BootTiming::immediate(),
    );
    let flasher = Flasher::new("/dev/ttyS0", EsptoolConfig::default(), bootloader, runner);
    clear(log);
    flasher
}

/// Creates `<tmp>/<VERSION>/` holding empty files with the given names.
pub fn version_dir(files: &[&str]) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let dir = tmp.path().join(VERSION);
    fs::create_dir(&dir).unwrap();
    for name in files {
        fs::write(dir.join(name), b"\xff\xff").unwrap();
    }
    (tmp, dir)
}

/// Records every callback in order.
#[derive(Default)]
pub struct Recorder {
    pub stages: Mutex<Vec<String>>,
    pub percents: Mutex<Vec<f32>>,
    pub lines: Mutex<Vec<String>>,
}

impl ProgressCallback for Recorder {
    fn on_stage(&self, stage: &str) {
        self.stages.lock().unwrap().push(stage.to_string());
    }

    fn on_progress(&self, percent: f32) {
        self.percents.lock().unwrap().push(percent);
    }

    fn on_log_line(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_string());
    }
}
