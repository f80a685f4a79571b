use std::fmt;
use once_cell::sync::OnceCell;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}


fn built_time() -> &'static str {
    static INSTANCE: OnceCell<String> = OnceCell::new();
    INSTANCE.get_or_init(|| {
        built::util::strptime(built_info::BUILT_TIME_UTC)
            .with_timezone(&built::chrono::offset::Local)
            .to_string()
    })
    .as_str()
}


const LOGO: &str = r"
+--------------------------------------------------------+
|                                                        |
|                   _                                    |
|    _ __ ___   __| |_ __   ___ __ _                     |
|   | '_ ` _ \ / _` | '_ \ / __/ _` |                    |
|   | | | | | | (_| | |_) | (_| (_| |                    |
|   |_| |_| |_|\__,_| .__/ \___\__,_|                    |
|                   |_|                                  |
|                                                        |
|   unwrap / align / PCA of MD coordinates and forces    |
+--------------------------------------------------------+";


/// Build information shown in `--help` and at the top of every log.
#[derive(Debug)]
pub struct Version {
    name:           &'static str,
    version_str:    &'static str,
    authors:        &'static str,
    built_time:     &'static str,
    git_hash_long:  Option<&'static str>,
    git_hash_short: Option<&'static str>,
    git_dirty:      Option<bool>,

    host:           &'static str,
    opt_level:      &'static str,
    profile:        &'static str,
    rustc:          &'static str,
    target:         &'static str,
}


impl Default for Version {
    fn default() -> Self { Self::new() }
}


impl Version {
    pub fn new() -> Self {
        Self {
            name:           built_info::PKG_NAME,
            version_str:    built_info::PKG_VERSION,
            authors:        built_info::PKG_AUTHORS,
            built_time:     built_time(),
            git_hash_long:  built_info::GIT_COMMIT_HASH,
            git_hash_short: built_info::GIT_COMMIT_HASH_SHORT,
            git_dirty:      built_info::GIT_DIRTY,
            host:           built_info::HOST,
            opt_level:      built_info::OPT_LEVEL,
            profile:        built_info::PROFILE,
            rustc:          built_info::RUSTC_VERSION,
            target:         built_info::TARGET,
        }
    }
}


impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", LOGO.trim())?;
        writeln!(f)?;
        writeln!(f, "Welcome to use {}!", self.name)?;
        writeln!(f, "    current version:    {}", self.version_str)?;
        writeln!(f, "    git hash:           {}", self.git_hash_short.unwrap_or("NO GIT INFO"))?;
        writeln!(f, "    author(s):          {}", self.authors)?;
        writeln!(f, "    host:               {}", self.host)?;
        writeln!(f, "    built time:         {}", self.built_time)?;

        if f.alternate() {
            writeln!(f, "        git_hash_long:  {}", self.git_hash_long.unwrap_or("NO GIT INFO"))?;
            if let Some(dirty) = self.git_dirty {
                writeln!(f, "        is git dirty?   {}", dirty)?;
            }
            writeln!(f, "        opt level:      {}", self.opt_level)?;
            writeln!(f, "        build profile:  {}", self.profile)?;
            writeln!(f, "        rustc version:  {}", self.rustc)?;
            writeln!(f, "        build target:   {}", self.target)?;
        }
        Ok(())
    }
}
