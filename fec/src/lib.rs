//! Systematic Reed-Solomon coding with error correction.
//!
//! A stripe of `k * s` bytes is cut into `k` data shares of `s` bytes each and
//! expanded to `n` total shares. Byte column `b` of the stripe defines the
//! unique polynomial of degree < `k` through the points `(j, stripe[j*s + b])`
//! for `j < k`; share `i` holds that polynomial's value at `i`. The first `k`
//! shares therefore equal the stripe slices verbatim.
//!
//! Unlike plain erasure decoding, [`Fec::correct`] does not need to be told
//! which shares are wrong: given `m >= k` shares it repairs up to
//! `(m - k) / 2` corrupted ones via Berlekamp-Welch decoding, which is what
//! lets a caller prove *which* shares were altered.

mod berlekamp;
mod gf8;

use thiserror::Error;

/// Errors that can occur when encoding or correcting shares.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("invalid parameters: required {required}, total {total}")]
    InvalidParameters { required: usize, total: usize },
    #[error("not enough shares: got {got}, required {required}")]
    NotEnoughShares { got: usize, required: usize },
    #[error("duplicate share number: {0}")]
    DuplicateNumber(usize),
    #[error("share number out of range: {0}")]
    NumberOutOfRange(usize),
    #[error("mismatched share sizes")]
    MismatchedShareSize,
    #[error("invalid stripe length: {0}")]
    InvalidStripeLength(usize),
    #[error("invalid share length: {0}")]
    InvalidShareLength(usize),
    #[error("shares are inconsistent beyond the correction budget")]
    TooManyErrors,
}

/// One erasure share of one stripe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Share {
    /// The share's index in the code, in `[0, total)`.
    pub number: usize,
    /// The share payload.
    pub data: Vec<u8>,
}

/// A systematic Reed-Solomon codec for a fixed `(required, total)` geometry.
#[derive(Clone, Debug)]
pub struct Fec {
    required: usize,
    total: usize,
}

impl Fec {
    /// The maximum number of total shares: one per element of GF(2^8).
    pub const MAX_TOTAL: usize = 256;

    /// Creates a codec that reconstructs from any `required` of `total`
    /// shares.
    pub fn new(required: usize, total: usize) -> Result<Self, Error> {
        if required == 0 || required > total || total > Self::MAX_TOTAL {
            return Err(Error::InvalidParameters { required, total });
        }
        Ok(Self { required, total })
    }

    /// The number of shares needed to reconstruct a stripe.
    pub fn required(&self) -> usize {
        self.required
    }

    /// The total number of shares the code produces.
    pub fn total(&self) -> usize {
        self.total
    }

    /// Deterministically emits the canonical share `number` for `stripe`.
    ///
    /// `stripe` must be a non-empty multiple of `required` bytes and `out`
    /// must be exactly one share long.
    pub fn encode_single(&self, stripe: &[u8], out: &mut [u8], number: usize) -> Result<(), Error> {
        if number >= self.total {
            return Err(Error::NumberOutOfRange(number));
        }
        if stripe.is_empty() || stripe.len() % self.required != 0 {
            return Err(Error::InvalidStripeLength(stripe.len()));
        }
        let size = stripe.len() / self.required;
        if out.len() != size {
            return Err(Error::InvalidShareLength(out.len()));
        }

        // Data shares are stripe slices.
        if number < self.required {
            out.copy_from_slice(&stripe[number * size..][..size]);
            return Ok(());
        }

        // Parity shares evaluate the column polynomials at `number`, which is
        // a fixed linear combination of the data shares.
        let points: Vec<u8> = (0..self.required).map(|j| j as u8).collect();
        let coeffs = lagrange_coeffs(&points, number as u8);
        for (b, value) in out.iter_mut().enumerate() {
            let mut acc = 0u8;
            for (j, &c) in coeffs.iter().enumerate() {
                acc = gf8::add(acc, gf8::mul(c, stripe[j * size + b]));
            }
            *value = acc;
        }
        Ok(())
    }

    /// Corrects `shares` in place so the set is consistent with a single
    /// underlying stripe.
    ///
    /// With `m` shares, up to `(m - required) / 2` corrupted ones are
    /// repaired. Fails with [`Error::TooManyErrors`] if no stripe explains
    /// the set within that budget. Callers that need the original bytes for
    /// comparison must pass copies.
    pub fn correct(&self, shares: &mut [Share]) -> Result<(), Error> {
        let size = self.validate(shares)?;
        let m = shares.len();
        let errors = (m - self.required) / 2;

        // Point powers are shared by every byte column.
        let degree = self.required + errors;
        let xpow: Vec<Vec<u8>> = shares
            .iter()
            .map(|share| {
                let x = share.number as u8;
                (0..=degree).map(|t| gf8::pow(x, t)).collect()
            })
            .collect();

        let mut ys = vec![0u8; m];
        for b in 0..size {
            for (i, share) in shares.iter().enumerate() {
                ys[i] = share.data[b];
            }
            let p = berlekamp::solve_column(&xpow, &ys, self.required, errors)
                .ok_or(Error::TooManyErrors)?;
            for (i, share) in shares.iter_mut().enumerate() {
                share.data[b] = gf8::eval(&p, xpow[i][1]);
            }
        }
        Ok(())
    }

    /// Reconstructs the `required` data shares from any consistent share set
    /// and hands each, in ascending number order, to `emit`.
    ///
    /// The shares must already be consistent (see [`Fec::correct`]).
    pub fn rebuild(
        &self,
        shares: &[Share],
        mut emit: impl FnMut(usize, &[u8]),
    ) -> Result<(), Error> {
        let size = self.validate(shares)?;

        // Interpolate from the lowest-numbered `required` shares.
        let mut order: Vec<usize> = (0..shares.len()).collect();
        order.sort_by_key(|&i| shares[i].number);
        let chosen = &order[..self.required];
        let points: Vec<u8> = chosen.iter().map(|&i| shares[i].number as u8).collect();

        let mut scratch = vec![0u8; size];
        for target in 0..self.required {
            if let Some(&i) = chosen
                .iter()
                .find(|&&i| shares[i].number == target)
            {
                emit(target, &shares[i].data);
                continue;
            }
            let coeffs = lagrange_coeffs(&points, target as u8);
            for (b, value) in scratch.iter_mut().enumerate() {
                let mut acc = 0u8;
                for (&c, &i) in coeffs.iter().zip(chosen) {
                    acc = gf8::add(acc, gf8::mul(c, shares[i].data[b]));
                }
                *value = acc;
            }
            emit(target, &scratch);
        }
        Ok(())
    }

    /// Checks share numbers and sizes, returning the share size.
    fn validate(&self, shares: &[Share]) -> Result<usize, Error> {
        if shares.len() < self.required {
            return Err(Error::NotEnoughShares {
                got: shares.len(),
                required: self.required,
            });
        }
        let mut seen = [false; Self::MAX_TOTAL];
        let size = shares[0].data.len();
        if size == 0 {
            return Err(Error::InvalidShareLength(0));
        }
        for share in shares {
            if share.number >= self.total {
                return Err(Error::NumberOutOfRange(share.number));
            }
            if seen[share.number] {
                return Err(Error::DuplicateNumber(share.number));
            }
            seen[share.number] = true;
            if share.data.len() != size {
                return Err(Error::MismatchedShareSize);
            }
        }
        Ok(size)
    }
}

/// Coefficients `c_i` such that the polynomial through `(points[i], v_i)`
/// evaluates at `target` to `sum_i c_i * v_i`.
fn lagrange_coeffs(points: &[u8], target: u8) -> Vec<u8> {
    let mut coeffs = Vec::with_capacity(points.len());
    for (i, &xi) in points.iter().enumerate() {
        let mut num = 1u8;
        let mut den = 1u8;
        for (j, &xj) in points.iter().enumerate() {
            if i == j {
                continue;
            }
            num = gf8::mul(num, gf8::add(target, xj));
            den = gf8::mul(den, gf8::add(xi, xj));
        }
        coeffs.push(gf8::div(num, den));
    }
    coeffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn encode_all(fec: &Fec, stripe: &[u8]) -> Vec<Share> {
        let size = stripe.len() / fec.required();
        (0..fec.total())
            .map(|number| {
                let mut data = vec![0u8; size];
                fec.encode_single(stripe, &mut data, number).unwrap();
                Share { number, data }
            })
            .collect()
    }

    fn random_stripe(rng: &mut StdRng, len: usize) -> Vec<u8> {
        (0..len).map(|_| rng.gen()).collect()
    }

    #[test]
    fn test_new_rejects_bad_parameters() {
        assert!(Fec::new(0, 4).is_err());
        assert!(Fec::new(5, 4).is_err());
        assert!(Fec::new(4, 257).is_err());
        assert!(Fec::new(4, 4).is_ok());
        assert!(Fec::new(4, 256).is_ok());
    }

    #[test]
    fn test_systematic_prefix() {
        let fec = Fec::new(4, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let stripe = random_stripe(&mut rng, 4 * 32);
        let shares = encode_all(&fec, &stripe);
        for (number, share) in shares.iter().take(4).enumerate() {
            assert_eq!(share.data, stripe[number * 32..][..32]);
        }
    }

    #[test]
    fn test_correct_is_identity_on_honest_shares() {
        let fec = Fec::new(4, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let stripe = random_stripe(&mut rng, 4 * 16);
        let shares = encode_all(&fec, &stripe);
        let mut copies = shares.clone();
        fec.correct(&mut copies).unwrap();
        assert_eq!(copies, shares);
    }

    #[test]
    fn test_correct_repairs_single_corruption() {
        let fec = Fec::new(4, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(2);
        let stripe = random_stripe(&mut rng, 4 * 64);
        let shares = encode_all(&fec, &stripe);
        let mut copies = shares.clone();
        for byte in copies[2].data.iter_mut() {
            *byte = 0xFF;
        }
        fec.correct(&mut copies).unwrap();
        assert_eq!(copies, shares);
    }

    #[test]
    fn test_correct_repairs_with_a_parity_subset() {
        // Drop one data share, corrupt a parity share: m = 5 of (2, 6)
        // allows one repair.
        let fec = Fec::new(2, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let stripe = random_stripe(&mut rng, 2 * 8);
        let shares = encode_all(&fec, &stripe);
        let mut subset: Vec<Share> = shares[1..].to_vec();
        subset[4].data[3] ^= 0x10;
        fec.correct(&mut subset).unwrap();
        assert_eq!(subset, shares[1..].to_vec());
    }

    #[test]
    fn test_correct_rejects_beyond_budget() {
        // m = 5 of (4, 6) has no correction budget; one corruption is
        // detectable but not repairable.
        let fec = Fec::new(4, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(4);
        let stripe = random_stripe(&mut rng, 4 * 8);
        let shares = encode_all(&fec, &stripe);
        let mut subset: Vec<Share> = shares[..5].to_vec();
        subset[0].data[0] ^= 1;
        assert_eq!(fec.correct(&mut subset), Err(Error::TooManyErrors));
    }

    #[test]
    fn test_correct_validates_shares() {
        let fec = Fec::new(2, 4).unwrap();
        let share = |number: usize, data: Vec<u8>| Share { number, data };

        let mut too_few = vec![share(0, vec![1, 2])];
        assert_eq!(
            fec.correct(&mut too_few),
            Err(Error::NotEnoughShares {
                got: 1,
                required: 2
            })
        );

        let mut duplicate = vec![share(1, vec![1]), share(1, vec![2])];
        assert_eq!(fec.correct(&mut duplicate), Err(Error::DuplicateNumber(1)));

        let mut out_of_range = vec![share(0, vec![1]), share(9, vec![2])];
        assert_eq!(
            fec.correct(&mut out_of_range),
            Err(Error::NumberOutOfRange(9))
        );

        let mut mismatched = vec![share(0, vec![1]), share(1, vec![2, 3])];
        assert_eq!(fec.correct(&mut mismatched), Err(Error::MismatchedShareSize));
    }

    #[test]
    fn test_rebuild_from_parity_only() {
        let fec = Fec::new(3, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let stripe = random_stripe(&mut rng, 3 * 16);
        let shares = encode_all(&fec, &stripe);

        let parity: Vec<Share> = shares[3..].to_vec();
        let mut rebuilt = vec![0u8; stripe.len()];
        fec.rebuild(&parity, |number, data| {
            rebuilt[number * 16..][..16].copy_from_slice(data);
        })
        .unwrap();
        assert_eq!(rebuilt, stripe);
    }

    #[test]
    fn test_rebuild_then_encode_single_roundtrip() {
        let fec = Fec::new(4, 6).unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let stripe = random_stripe(&mut rng, 4 * 256);
        let shares = encode_all(&fec, &stripe);

        // Rebuild the stripe from a mixed subset, then re-derive a share the
        // subset did not include.
        let subset = vec![
            shares[0].clone(),
            shares[2].clone(),
            shares[4].clone(),
            shares[5].clone(),
        ];
        let mut rebuilt = vec![0u8; stripe.len()];
        fec.rebuild(&subset, |number, data| {
            rebuilt[number * 256..][..256].copy_from_slice(data);
        })
        .unwrap();
        assert_eq!(rebuilt, stripe);

        let mut derived = vec![0u8; 256];
        fec.encode_single(&rebuilt, &mut derived, 3).unwrap();
        assert_eq!(derived, shares[3].data);
    }

    #[test]
    fn test_encode_single_validates_lengths() {
        let fec = Fec::new(2, 4).unwrap();
        let mut out = vec![0u8; 4];
        assert_eq!(
            fec.encode_single(&[1, 2, 3], &mut out, 0),
            Err(Error::InvalidStripeLength(3))
        );
        assert_eq!(
            fec.encode_single(&[], &mut out, 0),
            Err(Error::InvalidStripeLength(0))
        );
        assert_eq!(
            fec.encode_single(&[1, 2, 3, 4], &mut out, 0),
            Err(Error::InvalidShareLength(4))
        );
        assert_eq!(
            fec.encode_single(&[1, 2, 3, 4], &mut out[..2], 4),
            Err(Error::NumberOutOfRange(4))
        );
    }

    proptest! {
        #[test]
        fn prop_corrupting_within_budget_is_repaired(
            seed in 0u64..64,
            corrupt in 0usize..6,
            flip in 1u8..=255,
        ) {
            // (2, 6) with all shares present repairs up to two corruptions;
            // one is always within budget.
            let fec = Fec::new(2, 6).unwrap();
            let mut rng = StdRng::seed_from_u64(seed);
            let stripe = random_stripe(&mut rng, 2 * 8);
            let shares = encode_all(&fec, &stripe);
            let mut copies = shares.clone();
            copies[corrupt].data[0] ^= flip;
            fec.correct(&mut copies).unwrap();
            prop_assert_eq!(copies, shares);
        }
    }
}
