use std::fs;
use std::path::Path;

pub use anyhow::{
    self,
    Result,
    Context,
    bail,
    ensure,
};
pub use ndarray::{
    self,
    Array1,
    Array2,
    Array3,
};
pub use nalgebra;
pub use regex::Regex;
pub use log::{
    self,
    warn,
    info,
    debug,
    error,
};

pub mod numeric_methods;
pub use numeric_methods::{
    mean,
    cumsum,
};

pub type Mat33<T> = [[T;3];3];   // 3x3 matrix, rows are lattice vectors


/// Index array counted from 1 with possibly negative entries => 0-based indices into `0 .. len`.
///
/// `-1` means the last atom. If `v` contains `0`, all the indices `0 .. len` are returned.
/// Entries pointing outside `1 ..= len` (or `-len ..= -1`) are rejected.
pub fn index_transform(v: Vec<i32>, len: usize) -> Result<Vec<usize>> {
    if v.contains(&0) {
        return Ok((0 .. len).collect());
    }

    let ilen = len as i64;
    v.into_iter()
        .map(|i| {
            let i = i as i64;
            ensure!(i.abs() <= ilen, "[INDEX_TRANSFORM]: index {} out of range for {} atoms", i, len);
            if i < 0 {
                Ok((ilen + i) as usize)
            } else {
                Ok((i - 1) as usize)
            }
        })
        .collect()
}


/// Expand a whitespace separated selection such as `"1..5 12 -1"` into integers.
///
/// Each token is either an integer or an inclusive range `a..b` with `a <= b`. Zeros coming out
/// of tokens are dropped, except that the bare selection `"0"` yields `vec![0]` (everything).
pub fn range_parse(input: &str) -> Result<Vec<i32>> {
    if input.trim() == "0" {
        return Ok(vec![0]);
    }

    let token = Regex::new(r"^(-?\d+)(?:\.\.(-?\d+))?$")?;
    let mut ret = vec![];

    for s in input.split_ascii_whitespace() {
        let caps = token.captures(s)
            .with_context(|| format!("Selection token '{}' is neither an integer nor a range 'a..b'.", s))?;
        let lo = caps[1].parse::<i32>()?;
        let hi = match caps.get(2) {
            Some(m) => m.as_str().parse::<i32>()?,
            None    => lo,
        };
        ensure!(lo <= hi, "Selection range '{}' is empty, its start exceeds its end.", s);
        ret.extend((lo ..= hi).filter(|&i| i != 0));
    }

    Ok(ret)
}


/// Copy file `from` into directory `to` under its own name, or onto `to` when `to` is an
/// existing file. Returns the number of bytes copied.
pub fn copy_file_to<P, Q>(from: P, to: Q) -> Result<u64>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let (from, to) = (from.as_ref(), to.as_ref());
    ensure!(from.is_file(), "Cannot copy {:?}: not a regular file.", from);

    let target = if to.is_dir() {
        let fname = from.file_name()
            .with_context(|| format!("{:?} has no file name.", from))?;
        to.join(fname)
    } else {
        to.to_path_buf()
    };

    fs::copy(from, &target)
        .with_context(|| format!("Failed to copy {:?} to {:?}.", from, target))
}


/// Symbolic link `from` into directory `to`, used for large inputs not worth copying.
pub fn link_file_to<P, Q>(from: P, to: Q) -> Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    ensure!(from.as_ref().is_file(), "{:?} is not a regular file.", from.as_ref());
    ensure!(to.as_ref().is_dir(), "{:?} is not a directory.", to.as_ref());

    let from = from.as_ref().canonicalize()?;
    let fname = from.file_name()
        .with_context(|| format!("{:?} has no file name.", &from))?;
    let target = to.as_ref().join(fname);

    #[cfg(target_os = "windows")]
    std::os::windows::fs::symlink_file(&from, &target)?;

    #[cfg(not(target_os = "windows"))]
    std::os::unix::fs::symlink(&from, &target)?;

    Ok(())
}
