use chrono::Local;
use flexi_logger::{FileSpec, Logger, LoggerHandle, WriteMode};
use grnperm::param::{self, Param};
use log::{error, info};
use std::error::Error;
use std::process;

/// "YYYY-MM-DD HH:MM:SS [LEVEL] message"
fn custom_format(
    w: &mut dyn std::io::Write,
    now: &mut flexi_logger::DeferredNow,
    record: &log::Record,
) -> std::io::Result<()> {
    write!(
        w,
        "{} [{}] {}",
        now.now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.args()
    )
}

fn init_logger(param: &Param) -> Result<LoggerHandle, Box<dyn Error>> {
    let general = &param.general;
    let logger = Logger::try_with_str(&general.log_level)?.write_mode(WriteMode::BufferAndFlush);

    let handle = if !general.log_base.is_empty() {
        let timestamp = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        logger
            .log_to_file(
                FileSpec::default()
                    .basename(&general.log_base)
                    .suffix(&general.log_suffix)
                    .discriminant(&timestamp),
            )
            .format_for_files(custom_format)
            .format_for_stderr(custom_format)
            .start()?
    } else {
        logger.format_for_stderr(custom_format).start()?
    };

    Ok(handle)
}

fn main() {
    let param_path = std::env::args().nth(1).unwrap_or_else(|| "param.yaml".to_string());

    let param = match param::load(&param_path) {
        Ok(param) => param,
        Err(e) => {
            eprintln!("Cannot read {}: {}", param_path, e);
            process::exit(1);
        }
    };

    let logger = match init_logger(&param) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Cannot start logger: {}", e);
            process::exit(1);
        }
    };

    info!("grnperm v{}", grnperm::version());

    match grnperm::run(&param) {
        Ok(network) => {
            info!("{}", network.display(param.output.n_links_to_display, param.general.display_colorful && param.general.log_base.is_empty()));
        }
        Err(e) => {
            error!("{}", e);
            logger.flush();
            process::exit(1);
        }
    }
}
