//! Berlekamp-Welch decoding of one byte column.
//!
//! Shares are evaluations of a polynomial P of degree < k at distinct points.
//! Given m >= k points of which at most e = (m - k) / 2 are wrong, there exist
//! polynomials E (monic, degree e, the error locator) and Q (degree < k + e)
//! with Q(x_i) = y_i * E(x_i) at every point, and P = Q / E. Both are found by
//! solving one linear system over GF(2^8) per byte column.

use crate::gf8;

/// Solves for the data polynomial of one byte column.
///
/// `xpow[i][t]` must hold `x_i^t` for `t < k + e + 1`, and `ys[i]` the byte the
/// share at `x_i` reported. Returns the coefficients of P (length `k`, lowest
/// degree first), or `None` if no polynomial of degree < k agrees with at
/// least `m - e` of the points.
pub(crate) fn solve_column(xpow: &[Vec<u8>], ys: &[u8], k: usize, e: usize) -> Option<Vec<u8>> {
    let m = ys.len();
    debug_assert!(m >= k + 2 * e);

    // One equation per point: sum_t q_t x^t + y * sum_{t<e} e_t x^t = y * x^e.
    // Addition doubles as subtraction in characteristic 2.
    let qn = k + e;
    let unknowns = k + 2 * e;
    let mut rows = Vec::with_capacity(m);
    for i in 0..m {
        let mut row = Vec::with_capacity(unknowns + 1);
        row.extend_from_slice(&xpow[i][..qn]);
        for t in 0..e {
            row.push(gf8::mul(ys[i], xpow[i][t]));
        }
        row.push(gf8::mul(ys[i], xpow[i][e]));
        rows.push(row);
    }
    let solution = solve_linear(rows, unknowns)?;

    let p = if e == 0 {
        solution[..k].to_vec()
    } else {
        let mut locator = solution[qn..].to_vec();
        locator.push(1);
        poly_div_exact(&solution[..qn], &locator)?
    };

    // The division can come out exact even when more than e points are wrong;
    // accept P only if it explains all but at most e of them.
    let disagreements = (0..m)
        .filter(|&i| gf8::eval(&p, xpow[i][1]) != ys[i])
        .count();
    if disagreements > e {
        return None;
    }

    Some(p)
}

/// Gauss-Jordan elimination over GF(2^8) on an augmented system.
///
/// Each row has `unknowns + 1` entries, the last being the right-hand side.
/// Free variables resolve to zero. Returns `None` if the system is
/// inconsistent.
fn solve_linear(mut rows: Vec<Vec<u8>>, unknowns: usize) -> Option<Vec<u8>> {
    let mut pivot_of_col: Vec<Option<usize>> = vec![None; unknowns];
    let mut rank = 0;
    for col in 0..unknowns {
        let Some(pivot) = (rank..rows.len()).find(|&r| rows[r][col] != 0) else {
            continue;
        };
        rows.swap(rank, pivot);

        let scale = gf8::inv(rows[rank][col]);
        for value in rows[rank].iter_mut() {
            *value = gf8::mul(*value, scale);
        }

        let lead = rows[rank].clone();
        for (r, row) in rows.iter_mut().enumerate() {
            if r == rank || row[col] == 0 {
                continue;
            }
            let factor = row[col];
            for (value, lead_value) in row.iter_mut().zip(&lead) {
                *value = gf8::add(*value, gf8::mul(factor, *lead_value));
            }
        }

        pivot_of_col[col] = Some(rank);
        rank += 1;
    }

    // Rows below the rank are zero across every unknown; a non-zero
    // right-hand side there means no solution exists.
    for row in rows.iter().skip(rank) {
        if row[unknowns] != 0 {
            return None;
        }
    }

    let mut solution = vec![0u8; unknowns];
    for (col, pivot) in pivot_of_col.iter().enumerate() {
        if let Some(row) = pivot {
            solution[col] = rows[*row][unknowns];
        }
    }
    Some(solution)
}

/// Divides `num` by the monic polynomial `den` (coefficients lowest degree
/// first), returning the quotient only if the remainder is zero.
fn poly_div_exact(num: &[u8], den: &[u8]) -> Option<Vec<u8>> {
    let den_degree = den.len() - 1;
    debug_assert_eq!(den[den_degree], 1);
    if num.len() <= den_degree {
        return if num.iter().all(|&c| c == 0) {
            Some(vec![0u8; 1])
        } else {
            None
        };
    }

    let mut rem = num.to_vec();
    let mut quotient = vec![0u8; num.len() - den_degree];
    for i in (0..quotient.len()).rev() {
        let coeff = rem[i + den_degree];
        quotient[i] = coeff;
        if coeff == 0 {
            continue;
        }
        for (j, &d) in den.iter().enumerate() {
            rem[i + j] = gf8::add(rem[i + j], gf8::mul(coeff, d));
        }
    }
    if rem.iter().any(|&c| c != 0) {
        return None;
    }
    Some(quotient)
}
