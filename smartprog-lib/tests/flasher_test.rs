mod common;

use common::*;
use smartprog_lib::{Error, FlashState, NoOpProgressCallback};

const WRITE_LINES: [&str; 2] = ["[==>   ] 0.0%", "[=====>] 100.0%"];

#[test]
fn successful_attempt_runs_every_step_in_order() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply("write_flash", 0, &WRITE_LINES);
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);
    let recorder = Recorder::default();

    let outcome = flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder);

    assert!(outcome.success);
    assert_eq!(outcome.state, FlashState::Done);
    assert_eq!(outcome.stage, "Done");
    assert!(outcome.error.is_none());

    let mut expected = enter_sequence();
    expected.push(Event::Tool("espefuse.py set_flash_voltage".to_string()));
    expected.push(Event::Tool("esptool.py erase_flash".to_string()));
    expected.extend(enter_sequence());
    expected.push(Event::Tool("esptool.py write_flash".to_string()));
    expected.extend(exit_sequence());
    assert_eq!(events(&log), expected);

    assert_eq!(
        *recorder.stages.lock().unwrap(),
        vec!["Enter Bootloader", "Burn fuses", "Erase Flash", "Flash...", "Done"]
    );
    let percents = recorder.percents.lock().unwrap().clone();
    assert_eq!(percents.last(), Some(&100.0));
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(*recorder.lines.lock().unwrap(), WRITE_LINES.to_vec());
}

#[test]
fn erase_failure_skips_write_but_still_exits_bootloader() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply("erase_flash", 1, &["A fatal error occurred"]);
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);
    let recorder = Recorder::default();

    let outcome = flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder);

    assert!(!outcome.success);
    assert_eq!(outcome.state, FlashState::Failed);
    assert_eq!(outcome.failed_in, Some(FlashState::Erasing));
    assert_eq!(outcome.stage, "Error");
    assert!(matches!(
        outcome.error,
        Some(Error::ToolFailed { code: Some(1), .. })
    ));

    assert_eq!(
        tool_calls(&log),
        vec!["espefuse.py set_flash_voltage", "esptool.py erase_flash"]
    );
    let pins = pin_events(&log);
    assert_eq!(count_sequence(&pins, &enter_sequence()), 1);
    assert_eq!(count_sequence(&pins, &exit_sequence()), 1);
    assert_eq!(pins[pins.len() - 3..], exit_sequence()[..]);

    let stages = recorder.stages.lock().unwrap().clone();
    assert_eq!(stages.last().map(String::as_str), Some("Erase Flash"));
    assert!(!stages.iter().any(|s| s == "Done"));
    assert!(!recorder.percents.lock().unwrap().contains(&100.0));
}

#[test]
fn fuse_failure_is_fatal() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply("set_flash_voltage", 2, &[]);
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);
    let recorder = Recorder::default();

    let outcome = flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder);

    assert!(!outcome.success);
    assert_eq!(outcome.failed_in, Some(FlashState::BurningFuses));
    // The fuse stage is only announced once espefuse succeeded.
    assert_eq!(*recorder.stages.lock().unwrap(), vec!["Enter Bootloader"]);
    assert_eq!(*recorder.percents.lock().unwrap(), vec![0.0]);
    assert_eq!(tool_calls(&log), vec!["espefuse.py set_flash_voltage"]);
    assert_eq!(count_sequence(&pin_events(&log), &exit_sequence()), 1);
}

#[test]
fn exit_bootloader_runs_exactly_once_whatever_the_write_result() {
    for code in [0, 1] {
        let log = EventLog::default();
        let runner = ScriptedRunner::new(&log).reply("write_flash", code, &WRITE_LINES);
        let mut flasher = flasher(&log, runner);
        let (_tmp, dir) = version_dir(&FULL_SET);

        let outcome = flasher.flash_firmware(&dir.join(VARIANT_FILE), &NoOpProgressCallback);

        assert_eq!(outcome.success, code == 0);
        let pins = pin_events(&log);
        assert_eq!(count_sequence(&pins, &exit_sequence()), 1, "exit code {code}");
        assert_eq!(count_sequence(&pins, &enter_sequence()), 2, "exit code {code}");
        assert_eq!(pins[pins.len() - 3..], exit_sequence()[..]);
        if code != 0 {
            assert_eq!(outcome.failed_in, Some(FlashState::Writing));
        }
    }
}

#[test]
fn missing_image_never_touches_the_device() {
    let files: Vec<&str> = FULL_SET
        .iter()
        .copied()
        .filter(|f| !f.ends_with("_0x8000.bin"))
        .collect();
    let log = EventLog::default();
    let mut flasher = flasher(&log, ScriptedRunner::new(&log));
    let (_tmp, dir) = version_dir(&files);
    let recorder = Recorder::default();

    let outcome = flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder);

    assert!(!outcome.success);
    assert_eq!(outcome.stage, "Error");
    assert_eq!(outcome.failed_in, None);
    assert!(outcome.error.as_ref().is_some_and(Error::is_resolution_error));
    assert!(events(&log).is_empty());
    assert!(recorder.stages.lock().unwrap().is_empty());
    assert!(recorder.percents.lock().unwrap().is_empty());
}

#[test]
fn write_progress_is_remapped_onto_the_write_window() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply(
        "write_flash",
        0,
        &[
            "Compressed 2048 bytes to 32...",
            "[>        ] 0.0%",
            "Writing at 0x00010000...",
            "[====>    ] 50.0%",
            "[=========>] 100.0%",
            "Hash of data verified.",
        ],
    );
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);
    let recorder = Recorder::default();

    let outcome = flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder);

    assert!(outcome.success);
    assert_eq!(
        *recorder.percents.lock().unwrap(),
        vec![0.0, 5.0, 10.0, 15.0, 15.0, 57.5, 100.0]
    );
    assert_eq!(recorder.lines.lock().unwrap().len(), 6);
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-3, "{actual:?} != {expected:?}");
    }
}

#[test]
fn each_image_bar_advances_overall_progress() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply(
        "write_flash",
        0,
        &[
            "Writing at 0x00001000...",
            "[>     ] 0.0%",
            "[=====>] 100.0%",
            "Writing at 0x00010000...",
            "[>     ] 0.0%",
            "[==>   ] 50.0%",
            "[=====>] 100.0%",
            "Writing at 0x00008000...",
            "[>     ] 0.0%",
            "[=====>] 100.0%",
            "Writing at 0x0000e000...",
            "[>     ] 0.0%",
            "[=====>] 100.0%",
            "Writing at 0x00009000...",
            "[>     ] 0.0%",
            "[=====>] 100.0%",
        ],
    );
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);
    let recorder = Recorder::default();

    assert!(flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder).success);

    let percents = recorder.percents.lock().unwrap().clone();
    assert_close(
        &percents,
        &[0.0, 5.0, 10.0, 15.0, 15.0, 32.0, 40.5, 49.0, 66.0, 83.0, 100.0, 100.0],
    );
}

#[test]
fn application_write_is_visible_after_a_finished_bootloader_bar() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply(
        "write_flash",
        0,
        &[
            "[=====>] 100.0%",
            "[>     ] 1.0%",
            "[==>   ] 50.0%",
            "[====> ] 90.0%",
            "[=====>] 100.0%",
        ],
    );
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);
    let recorder = Recorder::default();

    flasher.flash_firmware(&dir.join(VARIANT_FILE), &recorder);

    let percents = recorder.percents.lock().unwrap().clone();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    let write_phase: Vec<f32> = percents[4..percents.len() - 1].to_vec();
    assert_eq!(write_phase.len(), 3, "{percents:?}");
    assert!(write_phase.iter().all(|p| *p > 15.0 && *p < 100.0), "{percents:?}");
    assert_eq!(percents.last(), Some(&100.0));
}

#[test]
fn tool_command_lines() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log);
    let commands = std::sync::Arc::clone(&runner.commands);
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);

    assert!(
        flasher
            .flash_firmware(&dir.join(VARIANT_FILE), &NoOpProgressCallback)
            .success
    );

    let commands = commands.lock().unwrap().clone();
    assert_eq!(commands.len(), 3);

    assert_eq!(commands[0].program, "espefuse.py");
    assert_eq!(
        commands[0].args,
        vec![
            "--chip",
            "esp32",
            "-p",
            "/dev/ttyS0",
            "--do-not-confirm",
            "set_flash_voltage",
            "3.3V"
        ]
    );

    assert_eq!(commands[1].program, "esptool.py");
    assert_eq!(
        commands[1].args,
        vec!["--chip", "esp32", "-b", "460800", "-p", "/dev/ttyS0", "erase_flash"]
    );

    let path = |name: &str| dir.join(name).to_string_lossy().into_owned();
    let mut expected: Vec<String> = [
        "--chip",
        "esp32",
        "-b",
        "460800",
        "-p",
        "/dev/ttyS0",
        "write_flash",
        "--flash_mode",
        "dio",
        "--flash_freq",
        "40m",
        "--flash_size",
        "4MB",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    expected.extend([
        "0x1000".to_string(),
        path("bootloader_0x1000.bin"),
        "0x10000".to_string(),
        path("app_0x10000.bin"),
        "0x8000".to_string(),
        path("partition-table_0x8000.bin"),
        "0xe000".to_string(),
        path("ota_data_initial_0xe000.bin"),
        "0x9000".to_string(),
        path(VARIANT_FILE),
    ]);
    assert_eq!(commands[2].args, expected);
}

#[test]
fn flasher_is_reusable_after_a_failure() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply("erase_flash", 1, &[]);
    let mut flasher = flasher(&log, runner);
    let (_tmp, dir) = version_dir(&FULL_SET);

    assert!(
        !flasher
            .flash_version(&dir, "battery_sw_a", &NoOpProgressCallback)
            .success
    );
    clear(&log);
    let again = flasher.flash_version(&dir, "battery_sw_a", &NoOpProgressCallback);

    assert_eq!(again.failed_in, Some(FlashState::Erasing));
    assert_eq!(pin_events(&log)[..3], enter_sequence()[..]);
}

#[test]
fn read_mac_address_parses_and_releases_the_chip() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply(
        "read_mac",
        0,
        &["Chip is ESP32-D0WD-V3", "MAC: 24:0A:C4:AA:BB:CC", "Hard resetting"],
    );
    let mut flasher = flasher(&log, runner);

    let mac = flasher.read_mac_address().unwrap();

    assert_eq!(mac, "24:0a:c4:aa:bb:cc");
    let mut expected = enter_sequence();
    expected.push(Event::Tool("esptool.py read_mac".to_string()));
    expected.extend(exit_sequence());
    assert_eq!(events(&log), expected);
}

#[test]
fn read_mac_address_failures_still_exit_bootloader() {
    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply("read_mac", 0, &["Chip is ESP32"]);
    let mut target = flasher(&log, runner);
    let err = target.read_mac_address().unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(count_sequence(&pin_events(&log), &exit_sequence()), 1);

    let log = EventLog::default();
    let runner = ScriptedRunner::new(&log).reply("read_mac", 2, &[]);
    let mut target = flasher(&log, runner);
    let err = target.read_mac_address().unwrap_err();
    assert!(matches!(err, Error::ToolFailed { code: Some(2), .. }));
    assert_eq!(count_sequence(&pin_events(&log), &exit_sequence()), 1);
}
