use std::path::Path;
use std::io::IsTerminal;
use std::sync::Mutex;
use once_cell::sync::OnceCell;

use shared::{
    anyhow::anyhow,
    log::LevelFilter,
    Result,
};
use log4rs::{
    append::{
        console::{
            ConsoleAppender,
            Target,
        },
        file::FileAppender,
    },
    config::{
        Appender,
        Config,
        Root,
    },
    encode::pattern::PatternEncoder,
    init_config,
    Handle,
};


static HANDLE: OnceCell<Mutex<Handle>> = OnceCell::new();

const ENCODE_STR: &str = "{d(%Y-%m-%d %H:%M:%S)} [{h({l:>5})}] {m}{n}";
const GLOBAL_LOG: &str = "./globalrun.log";


fn file_appender(path: impl AsRef<Path>) -> Result<FileAppender> {
    Ok(FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(ENCODE_STR)))
        .build(path)?)
}


fn gen_logger_config(outdir: Option<&Path>) -> Result<Config> {
    let level = LevelFilter::Info;
    let isatty = std::io::stderr().is_terminal();

    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(ENCODE_STR)))
        .target(Target::Stderr)
        .build();

    let mut builder = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)));
    let mut root = Root::builder().appender("stderr");

    // the global log only makes sense for interactive runs
    if isatty {
        builder = builder.appender(Appender::builder().build("global_log", Box::new(file_appender(GLOBAL_LOG)?)));
        root = root.appender("global_log");
    }

    if let Some(dir) = outdir {
        builder = builder.appender(Appender::builder().build("logfile", Box::new(file_appender(dir.join("run.log"))?)));
        root = root.appender("logfile");
    }

    Ok(builder.build(root.build(level))?)
}


/// Install the global logger writing to stderr (and `./globalrun.log` on a terminal).
/// Calling it more than once is harmless.
pub fn logger_init() -> Result<()> {
    HANDLE.get_or_try_init(|| -> Result<Mutex<Handle>> {
        let handle = init_config(gen_logger_config(None)?)?;
        Ok(Mutex::new(handle))
    })?;
    Ok(())
}


/// Additionally write the log to `outdir/run.log`.
pub fn logger_redirect(outdir: impl AsRef<Path>) -> Result<()> {
    logger_init()?;
    let config = gen_logger_config(Some(outdir.as_ref()))?;
    let handle = HANDLE.get().ok_or_else(|| anyhow!("Logger is not initialized."))?;
    handle.lock()
        .map_err(|_| anyhow!("Logger handle is poisoned."))?
        .set_config(config);
    Ok(())
}
