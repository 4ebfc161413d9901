mod board;
mod my_clock;
mod pins;

use std::io::Read;

use crossbeam_channel::unbounded;
use gcode_core::{FileSource, LevelingMode, Machine, MachineConfig, Planner};

use board::SimBoard;
use pins::SENSITIVE_PINS;

fn config(probe: bool) -> MachineConfig {
    MachineConfig {
        extruders: 2,
        leveling: if probe { LevelingMode::AutoGrid } else { LevelingMode::Mesh },
        sensitive_pins: &SENSITIVE_PINS,
        machine_name: "RAMPS Simulator",
        ..Default::default()
    }
}

/// `gcode_driver [--probe] [file.gcode]`: serial on stdin/stdout, the file
/// plays the part of the SD card.
fn main() {
    env_logger::init();
    my_clock::clock_init();

    let mut probe = false;
    let mut sd_file = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--probe" => probe = true,
            _ => sd_file = Some(arg),
        }
    }

    let (tx, rx) = unbounded::<u8>();
    std::thread::spawn(move || {
        for byte in std::io::stdin().lock().bytes() {
            match byte {
                Ok(b) => {
                    if tx.send(b).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("stdin: {}", e);
                    break;
                }
            }
        }
    });

    let config = config(probe);
    let mut board = SimBoard::new(rx, &config);
    if let Some(path) = sd_file {
        match std::fs::read(&path) {
            Ok(contents) => {
                log::info!("printing {} ({} bytes)", path, contents.len());
                board.load_file(contents);
            }
            Err(e) => log::error!("cannot open {}: {}", path, e),
        }
    }

    let mut machine = Machine::new(board, config);
    machine.start();
    loop {
        machine.poll();
        let drained = !machine.has_pending_commands()
            && !machine.board.is_printing()
            && !machine.board.has_blocks_queued();
        if drained && !machine.board.host_open() {
            break;
        }
        if drained {
            std::thread::yield_now();
        }
    }
}
