//! Open-mode flags, tuning flags, and the `path#key=value#...` connection
//! string surface of §6.1-§6.3, following the `pub` field + `const`
//! default + `with_*` builder pattern the teacher uses for its own
//! store configuration (`robt_config.rs`'s `Config`).

use std::str::FromStr;

use crate::error::{Error, Result};

/// Macro-free, hand-rolled bitflags: the teacher's dependency set has
/// no `bitflags` crate, and a newtype over `u32` with `const`
/// associated flags reads the same way its `EnvironmentFlags`-style
/// consumers expect (`flags & OpenFlags::WRITER != 0`).
macro_rules! bitflags_like {
    (
        $(#[$outer:meta])*
        pub struct $name:ident: $ty:ty {
            $($variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$outer])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name(pub $ty);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub fn contains(&self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }
    };
}

bitflags_like! {
    /// OR-combinable open-mode flags (§6.2), mapped 1-to-1 onto the
    /// equivalent LMDB environment flags by the storage adapters.
    pub struct OpenFlags: u32 {
        READER = 0x01;
        WRITER = 0x02;
        CREATE = 0x04;
        TRUNC  = 0x08;
        NOLCK  = 0x10;
        LCKNB  = 0x20;
        TSYNC  = 0x40;
    }
}

bitflags_like! {
    /// Tuning flags (§6.3), forwarded to both the hash store and every
    /// index tree.
    pub struct TuneFlags: u32 {
        LARGE   = 0x01;
        DEFLATE = 0x02;
        BZIP    = 0x04;
        TCBS    = 0x08;
        EXCODEC = 0x10;
    }
}

/// Tuning parameters set on a closed handle before `open` (§3's
/// Lifecycle, §C's `tctdbtune`-equivalent setters).
#[derive(Clone, Debug)]
pub struct Config {
    pub dir: String,
    pub name: String,
    pub bnum: u64,
    pub apow: u8,
    pub fpow: u8,
    pub opts: TuneFlags,
    pub lcnum: u32,
    pub ncnum: u32,
    pub xmsiz: u64,
    pub dfunit: u32,
    /// size, in bytes, at which a token index's in-memory flush buffer
    /// is written out to its backing tree (§4.3).
    pub token_flush_threshold: usize,
    opened: bool,
}

impl Config {
    pub const DEFAULT_BNUM: u64 = 131_071;
    pub const DEFAULT_APOW: u8 = 4;
    pub const DEFAULT_FPOW: u8 = 10;
    pub const DEFAULT_TOKEN_FLUSH_THRESHOLD: usize = 64 * 1024 * 1024;

    pub fn new(dir: &str, name: &str) -> Config {
        Config {
            dir: dir.to_string(),
            name: name.to_string(),
            bnum: Self::DEFAULT_BNUM,
            apow: Self::DEFAULT_APOW,
            fpow: Self::DEFAULT_FPOW,
            opts: TuneFlags::default(),
            lcnum: 0,
            ncnum: 0,
            xmsiz: 64 * 1024 * 1024,
            dfunit: 0,
            token_flush_threshold: Self::DEFAULT_TOKEN_FLUSH_THRESHOLD,
            opened: false,
        }
    }

    fn guard_closed(&self) -> Result<()> {
        if self.opened {
            Err(Error::InvalidState(
                "cannot tune a database after it has been opened".into(),
            ))
        } else {
            Ok(())
        }
    }

    pub fn set_bnum(&mut self, bnum: u64) -> Result<&mut Self> {
        self.guard_closed()?;
        self.bnum = bnum;
        Ok(self)
    }

    pub fn set_apow(&mut self, apow: u8) -> Result<&mut Self> {
        self.guard_closed()?;
        self.apow = apow;
        Ok(self)
    }

    pub fn set_fpow(&mut self, fpow: u8) -> Result<&mut Self> {
        self.guard_closed()?;
        self.fpow = fpow;
        Ok(self)
    }

    pub fn set_opts(&mut self, opts: TuneFlags) -> Result<&mut Self> {
        self.guard_closed()?;
        self.opts = opts;
        Ok(self)
    }

    pub fn set_cache(&mut self, lcnum: u32, ncnum: u32) -> Result<&mut Self> {
        self.guard_closed()?;
        self.lcnum = lcnum;
        self.ncnum = ncnum;
        Ok(self)
    }

    pub fn set_xmsiz(&mut self, xmsiz: u64) -> Result<&mut Self> {
        self.guard_closed()?;
        self.xmsiz = xmsiz;
        Ok(self)
    }

    pub fn set_dfunit(&mut self, dfunit: u32) -> Result<&mut Self> {
        self.guard_closed()?;
        self.dfunit = dfunit;
        Ok(self)
    }

    pub(crate) fn mark_opened(&mut self) {
        self.opened = true;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.opened = false;
    }
}

/// Parse a `path#key=value#key=value...` connection string into a base
/// path and a [`Config`] seeded from the recognized tuning tokens,
/// mirroring the original library's `tcadbopen`-style DSN.
///
/// Recognized tokens: `bnum`, `apow`, `fpow`, `opts` (any of `l`, `d`,
/// `b`, `t`, `x` concatenated, for large/deflate/bzip/tcbs/excodec),
/// `lcnum`, `ncnum`, `xmsiz`, `dfunit`.
pub fn parse_dsn(dsn: &str) -> Result<(String, Config)> {
    let mut parts = dsn.split('#');
    let path = parts
        .next()
        .ok_or_else(|| Error::InvalidArgument("empty database path".into()))?
        .to_string();
    if path.is_empty() {
        return Err(Error::InvalidArgument("empty database path".into()));
    }
    let name = std::path::Path::new(&path)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.clone());
    let dir = std::path::Path::new(&path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut config = Config::new(&dir, &name);

    for tok in parts {
        let mut kv = tok.splitn(2, '=');
        let key = kv.next().unwrap_or("");
        let value = kv.next().unwrap_or("");
        match key {
            "bnum" => config.bnum = parse_u64(value)?,
            "apow" => config.apow = parse_u64(value)? as u8,
            "fpow" => config.fpow = parse_u64(value)? as u8,
            "lcnum" => config.lcnum = parse_u64(value)? as u32,
            "ncnum" => config.ncnum = parse_u64(value)? as u32,
            "xmsiz" => config.xmsiz = parse_u64(value)?,
            "dfunit" => config.dfunit = parse_u64(value)? as u32,
            "opts" => {
                let mut opts = TuneFlags::default();
                for c in value.chars() {
                    opts |= match c {
                        'l' => TuneFlags::LARGE,
                        'd' => TuneFlags::DEFLATE,
                        'b' => TuneFlags::BZIP,
                        't' => TuneFlags::TCBS,
                        'x' => TuneFlags::EXCODEC,
                        other => {
                            return Err(Error::InvalidArgument(format!(
                                "unknown tuning option {:?}",
                                other
                            )))
                        }
                    };
                }
                config.opts = opts;
            }
            "" => {}
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unknown connection-string token {:?}",
                    other
                )))
            }
        }
    }
    Ok((path, config))
}

fn parse_u64(s: &str) -> Result<u64> {
    s.parse::<u64>()
        .map_err(|_| Error::InvalidArgument(format!("not a number: {:?}", s)))
}

impl FromStr for Config {
    type Err = Error;

    fn from_str(dsn: &str) -> Result<Config> {
        Ok(parse_dsn(dsn)?.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tuning_tokens() {
        let (path, cfg) = parse_dsn("/tmp/my.tdb#bnum=100000#apow=6#opts=ld").unwrap();
        assert_eq!(path, "/tmp/my.tdb");
        assert_eq!(cfg.bnum, 100_000);
        assert_eq!(cfg.apow, 6);
        assert!(cfg.opts.contains(TuneFlags::LARGE));
        assert!(cfg.opts.contains(TuneFlags::DEFLATE));
        assert!(!cfg.opts.contains(TuneFlags::BZIP));
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(parse_dsn("/tmp/my.tdb#bogus=1").is_err());
    }

    #[test]
    fn open_flags_compose() {
        let f = OpenFlags::WRITER | OpenFlags::CREATE;
        assert!(f.contains(OpenFlags::WRITER));
        assert!(f.contains(OpenFlags::CREATE));
        assert!(!f.contains(OpenFlags::TRUNC));
    }

    #[test]
    fn tuning_after_open_is_rejected() {
        let mut cfg = Config::new("/tmp", "x.tdb");
        cfg.mark_opened();
        assert!(cfg.set_bnum(10).is_err());
    }
}
