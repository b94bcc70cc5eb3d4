use std::fs::File;
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use arrrg::CommandLine;
use biometrics::{Collector, PlainTextEmitter};
use indicio::{
    clue,
    stdio::StdioEmitter,
    {ALWAYS, INFO},
};

use symposium::dinner::{Dinner, DinnerOptions};
use symposium::COLLECTOR;

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn main() {
    minimal_signals::block();
    let (options, free) = DinnerOptions::from_command_line("Usage: symposium [OPTIONS]");
    if !free.is_empty() {
        eprintln!("command takes no positional arguments");
        std::process::exit(1);
    }
    // indicio
    let emitter = Arc::new(StdioEmitter);
    COLLECTOR.register(emitter);
    COLLECTOR.set_verbosity(if options.quiet { ALWAYS } else { INFO });
    clue!(COLLECTOR, ALWAYS, {
        new_process: std::env::args().map(String::from).collect::<Vec<_>>(),
    });
    // biometrics
    let collector = Collector::new();
    symposium::register_biometrics(&collector);
    let mut metrics = if options.metrics.is_empty() {
        None
    } else {
        match File::create(&options.metrics) {
            Ok(file) => Some(PlainTextEmitter::new(file)),
            Err(err) => {
                eprintln!("could not open {}: {}", options.metrics, err);
                std::process::exit(1);
            }
        }
    };
    // signals
    let (signals, signalled) = channel();
    let _ = std::thread::spawn(move || loop {
        let signal_set = minimal_signals::SignalSet::new().fill();
        let signal = minimal_signals::wait(signal_set);
        if signal == Some(minimal_signals::SIGCHLD) {
            continue;
        }
        if signals.send(signal).is_err() {
            break;
        }
    });
    // dinner
    let dinner = match Dinner::start(&options) {
        Ok(dinner) => dinner,
        Err(err) => {
            eprintln!("could not start dinner: {}", err);
            std::process::exit(1);
        }
    };
    let started = Instant::now();
    loop {
        match signalled.recv_timeout(Duration::from_secs(1)) {
            Ok(signal) => {
                clue!(COLLECTOR, ALWAYS, {
                    signal: signal.map(|s| s.into_i32() as i64).unwrap_or(-1),
                });
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        if let Some(metrics) = metrics.as_mut() {
            if let Err(err) = collector.emit(metrics, now_millis()) {
                eprintln!("collector error: {}", err);
            }
        }
        if dinner.is_finished() {
            break;
        }
        if options.duration_secs > 0 && started.elapsed().as_secs() >= options.duration_secs {
            break;
        }
    }
    dinner.stop();
    let stats = dinner.join();
    if let Some(metrics) = metrics.as_mut() {
        if let Err(err) = collector.emit(metrics, now_millis()) {
            eprintln!("collector error: {}", err);
        }
    }
    for s in stats.iter() {
        println!(
            "agent {}: meals={} mean_wait={:?} longest_wait={:?}{}",
            s.agent,
            s.meals,
            s.mean_wait(),
            s.longest_wait,
            if s.interrupted { " interrupted" } else { "" },
        );
    }
    clue!(COLLECTOR, ALWAYS, {
        goodbye: std::env::args().map(String::from).collect::<Vec<_>>(),
    });
}
