//! Matrix persistence: big-endian binary format and a textual dump.
//!
//! Binary layout: a four-field `i32` header `[cookie, m, n, nz]`, then `m`
//! row lengths (`i32`), `nz` column indices (`i32`), `nz` values (`f64`).
//! All fields big-endian. A negative `nz` marks a dense payload, which this
//! loader does not read.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::linalg::csr::CsrMatrix;

/// Identifies a sparse matrix in the binary format.
pub const MATRIX_COOKIE: i32 = 1_211_216;

fn read_i32<R: Read>(r: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_be_bytes(buf))
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_be_bytes(buf))
}

fn write_all<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_all(bytes)?;
    Ok(())
}

/// Writes an assembled matrix in the binary format.
pub fn write_binary<W: Write>(mat: &CsrMatrix, w: &mut W) -> Result<()> {
    if !mat.is_assembled() {
        return Err(Error::invalid_state("binary write of unassembled matrix"));
    }
    let (m, n) = mat.dims();
    write_all(w, &MATRIX_COOKIE.to_be_bytes())?;
    write_all(w, &(m as i32).to_be_bytes())?;
    write_all(w, &(n as i32).to_be_bytes())?;
    write_all(w, &(mat.nnz() as i32).to_be_bytes())?;
    for i in 0..m {
        let (cols, _) = mat.row(i);
        write_all(w, &(cols.len() as i32).to_be_bytes())?;
    }
    for i in 0..m {
        let (cols, _) = mat.row(i);
        for &c in cols {
            write_all(w, &(c as i32).to_be_bytes())?;
        }
    }
    for i in 0..m {
        let (_, vals) = mat.row(i);
        for &v in vals {
            write_all(w, &v.to_be_bytes())?;
        }
    }
    Ok(())
}

/// Reads a matrix written by [`write_binary`].
///
/// # Errors
/// `InvalidArgument` on a wrong cookie or inconsistent header fields;
/// `UnsupportedOperation` on a negative `nz` (dense payload).
pub fn read_binary<R: Read>(r: &mut R) -> Result<CsrMatrix> {
    let cookie = read_i32(r)?;
    if cookie != MATRIX_COOKIE {
        return Err(Error::invalid_arg(format!(
            "not a matrix stream (cookie {})",
            cookie
        )));
    }
    let m = read_i32(r)?;
    let n = read_i32(r)?;
    let nz = read_i32(r)?;
    if m < 0 || n < 0 {
        return Err(Error::invalid_arg("negative dimension in matrix header"));
    }
    if nz < 0 {
        return Err(Error::unsupported(
            "dense-format matrix stream (negative nonzero count)",
        ));
    }
    let (m, n, nz) = (m as usize, n as usize, nz as usize);

    let mut lens = Vec::with_capacity(m);
    let mut total = 0usize;
    for _ in 0..m {
        let l = read_i32(r)?;
        if l < 0 {
            return Err(Error::invalid_arg("negative row length"));
        }
        total += l as usize;
        lens.push(l as usize);
    }
    if total != nz {
        return Err(Error::invalid_arg(
            "row lengths disagree with header nonzero count",
        ));
    }
    let mut row_start = Vec::with_capacity(m + 1);
    row_start.push(0usize);
    for &l in &lens {
        row_start.push(row_start.last().copied().unwrap_or(0) + l);
    }
    let mut col_index = Vec::with_capacity(nz);
    for _ in 0..nz {
        let c = read_i32(r)?;
        if c < 0 || c as usize >= n.max(1) {
            return Err(Error::invalid_arg("column index out of range in stream"));
        }
        col_index.push(c as usize);
    }
    let mut values = Vec::with_capacity(nz);
    for _ in 0..nz {
        values.push(read_f64(r)?);
    }
    CsrMatrix::from_csr(m, n, row_start, col_index, values)
}

/// Dumps the matrix row by row as `row i: (col, value) ...`.
pub fn write_ascii<W: Write>(mat: &CsrMatrix, w: &mut W) -> Result<()> {
    let (m, _) = mat.dims();
    for i in 0..m {
        let (cols, vals) = mat.row(i);
        let mut line = format!("row {}:", i);
        for (c, v) in cols.iter().zip(vals) {
            line.push_str(&format!(" ({}, {})", c, v));
        }
        line.push('\n');
        write_all(w, line.as_bytes())?;
    }
    Ok(())
}
