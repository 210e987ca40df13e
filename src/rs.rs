/*! Reed-Solomon codec over GF(2^8).

Systematic RS(n, n-nsym) with n up to 255. The field is defined by the
reducing polynomial x^8+x^4+x^3+x^2+1 (0x11d), the generator roots start at
α^0, and α = 2 — the conventions of the widely deployed byte-oriented RS
codes.

The decoder corrects ν errors plus e erasures as long as 2ν + e ≤ nsym.

Further reading:
* <https://www.kernel.org/doc/html/v4.15/core-api/librs.html>
* <https://berthub.eu/articles/posts/reed-solomon-for-programmers/>
*/
use crate::{Error, Result};

const PRIMITIVE: u16 = 0x11d;

/// Exp table twice over so products of two log values index without a
/// modulo, plus the matching log table. Built at compile time so encoder
/// and decoder cannot disagree on field arithmetic.
const fn build_tables() -> ([u8; 512], [u8; 256]) {
    let mut exp = [0u8; 512];
    let mut log = [0u8; 256];
    let mut x: u16 = 1;
    let mut i = 0;
    while i < 255 {
        exp[i] = x as u8;
        log[x as usize] = i as u8;
        x <<= 1;
        if x & 0x100 != 0 {
            x ^= PRIMITIVE;
        }
        i += 1;
    }
    while i < 512 {
        exp[i] = exp[i - 255];
        i += 1;
    }
    (exp, log)
}

const TABLES: ([u8; 512], [u8; 256]) = build_tables();
const EXP: [u8; 512] = TABLES.0;
const LOG: [u8; 256] = TABLES.1;

#[inline]
fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        0
    } else {
        EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
    }
}

#[inline]
fn gf_div(a: u8, b: u8) -> u8 {
    debug_assert_ne!(b, 0);
    if a == 0 {
        0
    } else {
        EXP[LOG[a as usize] as usize + 255 - LOG[b as usize] as usize]
    }
}

#[inline]
fn gf_inv(a: u8) -> u8 {
    debug_assert_ne!(a, 0);
    EXP[255 - LOG[a as usize] as usize]
}

/// α^p for any integer p, negative included.
#[inline]
fn alpha_pow(p: i64) -> u8 {
    EXP[p.rem_euclid(255) as usize]
}

/// Polynomial product; the coefficient order convention (lowest or highest
/// degree first) carries through convolution unchanged, as long as both
/// inputs agree.
fn poly_mul(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; a.len() + b.len() - 1];
    for (i, &x) in a.iter().enumerate() {
        if x == 0 {
            continue;
        }
        for (j, &y) in b.iter().enumerate() {
            out[i + j] ^= gf_mul(x, y);
        }
    }
    out
}

/// Evaluate a lowest-degree-first polynomial at x (Horner from the top).
fn poly_eval(p: &[u8], x: u8) -> u8 {
    p.iter().rev().fold(0, |acc, &c| gf_mul(acc, x) ^ c)
}

/// Evaluate a codeword (highest-degree coefficient first, i.e. wire order)
/// at x.
fn poly_eval_wire(msg: &[u8], x: u8) -> u8 {
    msg.iter().fold(0, |acc, &c| gf_mul(acc, x) ^ c)
}

/// c(x) + scale · x^shift · b(x). In GF(2^m) addition is subtraction.
fn poly_add_scaled(c: &[u8], scale: u8, b: &[u8], shift: usize) -> Vec<u8> {
    let mut out = vec![0u8; c.len().max(b.len() + shift)];
    out[..c.len()].copy_from_slice(c);
    for (i, &x) in b.iter().enumerate() {
        out[i + shift] ^= gf_mul(scale, x);
    }
    out
}

fn trim(mut p: Vec<u8>) -> Vec<u8> {
    while p.len() > 1 && *p.last().unwrap() == 0 {
        p.pop();
    }
    p
}

/// A Reed-Solomon encoder/decoder with a fixed parity symbol count.
#[derive(Debug, Clone)]
pub struct ReedSolomon {
    nsym: usize,
    /// Generator polynomial Π (x - α^i), highest degree first, for the
    /// encoder's synthetic division.
    genpoly: Vec<u8>,
}

impl ReedSolomon {
    /// Create a codec appending `nsym` parity symbols.
    ///
    /// Panics unless 0 < nsym < 255.
    #[must_use]
    pub fn new(nsym: usize) -> Self {
        assert!(nsym > 0 && nsym < 255, "invalid parity symbol count {nsym}");
        let mut genpoly = vec![1u8];
        for i in 0..nsym {
            genpoly = poly_mul(&genpoly, &[1, alpha_pow(i as i64)]);
        }
        Self { nsym, genpoly }
    }

    /// Parity symbol count.
    #[must_use]
    pub fn parity_len(&self) -> usize {
        self.nsym
    }

    /// Systematic encode: returns data followed by `nsym` parity symbols.
    ///
    /// Panics if data plus parity exceeds 255 symbols.
    #[must_use]
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        assert!(data.len() + self.nsym <= 255, "message too long for GF(2^8)");
        let mut out = vec![0u8; data.len() + self.nsym];
        out[..data.len()].copy_from_slice(data);
        // Synthetic division by the generator; the tail ends up holding the
        // remainder.
        for i in 0..data.len() {
            let coef = out[i];
            if coef != 0 {
                for (j, &g) in self.genpoly.iter().enumerate().skip(1) {
                    out[i + j] ^= gf_mul(g, coef);
                }
            }
        }
        out[..data.len()].copy_from_slice(data);
        out
    }

    /// Correct `codeword` in place. `erasures` lists byte positions known
    /// to be unreliable. Returns the number of corrected symbols, or
    /// [`Error::FecExhausted`] when the errata exceed the code's capacity.
    pub fn decode(&self, codeword: &mut [u8], erasures: &[usize]) -> Result<usize> {
        let n = codeword.len();
        assert!(n <= 255 && n > self.nsym);
        if erasures.len() > self.nsym {
            return Err(Error::FecExhausted);
        }

        let synd: Vec<u8> = (0..self.nsym)
            .map(|j| poly_eval_wire(codeword, alpha_pow(j as i64)))
            .collect();
        if synd.iter().all(|&s| s == 0) {
            return Ok(0);
        }

        // Erasure locator Γ(x) = Π (1 + X_i x), lowest degree first.
        let mut gamma = vec![1u8];
        for &pos in erasures {
            let x = alpha_pow((n - 1 - pos) as i64);
            gamma = poly_mul(&gamma, &[1, x]);
        }

        // Forney syndromes: fold each erasure out so Berlekamp-Massey sees
        // only the unknown errors. Each erasure consumes one syndrome.
        let mut fsynd = synd.clone();
        for &pos in erasures {
            let x = alpha_pow((n - 1 - pos) as i64);
            for j in 0..fsynd.len() - 1 {
                fsynd[j] = gf_mul(fsynd[j], x) ^ fsynd[j + 1];
            }
            fsynd.pop();
        }

        let lambda = berlekamp_massey(&fsynd)?;
        let nu = lambda.len() - 1;
        if 2 * nu > fsynd.len() {
            return Err(Error::FecExhausted);
        }

        // Errata locator and evaluator.
        let psi = trim(poly_mul(&lambda, &gamma));
        let mut omega = poly_mul(&synd, &psi);
        omega.truncate(self.nsym);

        // Chien search for the errata positions.
        let mut positions = Vec::with_capacity(psi.len() - 1);
        for i in 0..n {
            let p = (n - 1 - i) as i64;
            if poly_eval(&psi, alpha_pow(-p)) == 0 {
                positions.push(i);
            }
        }
        if positions.len() != psi.len() - 1 {
            return Err(Error::FecExhausted);
        }

        // Forney: magnitude at X = α^p is X·Ω(X⁻¹)/ψ'(X⁻¹).
        for &i in &positions {
            let p = (n - 1 - i) as i64;
            let num = poly_eval(&omega, alpha_pow(-p));
            let mut den = 0u8;
            for (d, &c) in psi.iter().enumerate() {
                if d % 2 == 1 {
                    den ^= gf_mul(c, alpha_pow(-p * (d as i64 - 1)));
                }
            }
            if den == 0 {
                return Err(Error::FecExhausted);
            }
            codeword[i] ^= gf_mul(alpha_pow(p), gf_div(num, den));
        }

        // A decode that leaves nonzero syndromes was a miscorrection.
        let clean = (0..self.nsym).all(|j| poly_eval_wire(codeword, alpha_pow(j as i64)) == 0);
        if !clean {
            return Err(Error::FecExhausted);
        }
        Ok(positions.len())
    }
}

/// Berlekamp-Massey over the (Forney) syndromes; returns the error locator
/// Λ(x), lowest degree first, with Λ(0) = 1.
fn berlekamp_massey(s: &[u8]) -> Result<Vec<u8>> {
    let mut c = vec![1u8];
    let mut b = vec![1u8];
    let mut l: usize = 0;
    let mut m: usize = 1;
    let mut bb: u8 = 1;
    for r in 0..s.len() {
        let mut delta = s[r];
        for j in 1..=l.min(r) {
            if j < c.len() {
                delta ^= gf_mul(c[j], s[r - j]);
            }
        }
        if delta == 0 {
            m += 1;
        } else if 2 * l <= r {
            let t = c.clone();
            c = poly_add_scaled(&c, gf_mul(delta, gf_inv(bb)), &b, m);
            l = r + 1 - l;
            b = t;
            bb = delta;
            m = 1;
        } else {
            c = poly_add_scaled(&c, gf_mul(delta, gf_inv(bb)), &b, m);
            m += 1;
        }
    }
    let c = trim(c);
    if c.len() - 1 != l {
        return Err(Error::FecExhausted);
    }
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_basics() {
        assert_eq!(gf_mul(0, 7), 0);
        assert_eq!(gf_mul(1, 7), 7);
        // α^8 = α^4 + α^3 + α^2 + 1 under 0x11d.
        assert_eq!(alpha_pow(8), 0x1d);
        for a in 1..=255u8 {
            assert_eq!(gf_mul(a, gf_inv(a)), 1, "inverse of {a}");
            assert_eq!(gf_div(a, a), 1);
        }
    }

    #[test]
    fn encode_is_systematic_with_zero_syndromes() {
        let rs = ReedSolomon::new(10);
        let data = b"hello world".to_vec();
        let code = rs.encode(&data);
        assert_eq!(code.len(), data.len() + 10);
        assert_eq!(&code[..data.len()], &data[..]);
        for j in 0..10 {
            assert_eq!(poly_eval_wire(&code, alpha_pow(j)), 0, "syndrome {j}");
        }
    }

    #[test]
    fn corrects_up_to_capacity() {
        let rs = ReedSolomon::new(30);
        let data: Vec<u8> = (0..225u32).map(|i| (i * 7 % 256) as u8).collect();
        let code = rs.encode(&data);
        for nerr in [1usize, 5, 15] {
            let mut bad = code.clone();
            for k in 0..nerr {
                let pos = (k * 37 + 11) % bad.len();
                bad[pos] ^= (k as u8).wrapping_mul(31) | 1;
            }
            let fixed = rs.decode(&mut bad, &[]).unwrap();
            assert_eq!(fixed, nerr);
            assert_eq!(bad, code);
        }
    }

    #[test]
    fn rejects_beyond_capacity() {
        let rs = ReedSolomon::new(30);
        let data: Vec<u8> = (0..225u32).map(|i| (i % 251) as u8).collect();
        let code = rs.encode(&data);
        let mut bad = code.clone();
        for k in 0..16 {
            bad[k * 9 + 3] ^= 0x5a;
        }
        assert!(matches!(rs.decode(&mut bad, &[]), Err(Error::FecExhausted)));
    }

    #[test]
    fn corrects_erasures_and_mixed_errata() {
        let rs = ReedSolomon::new(30);
        let data: Vec<u8> = (0..225u32).map(|i| (i * 13 % 256) as u8).collect();
        let code = rs.encode(&data);

        // 30 pure erasures: exactly at capacity.
        let mut bad = code.clone();
        let erasures: Vec<usize> = (100..130).collect();
        for &e in &erasures {
            bad[e] = 0;
        }
        let fixed = rs.decode(&mut bad, &erasures).unwrap();
        // Erased positions that already held 0 need no correction.
        assert!(fixed <= 30);
        assert_eq!(bad, code);

        // 10 erasures plus 10 unknown errors: 10 + 2*10 = 30 = nsym.
        let mut bad = code.clone();
        let erasures: Vec<usize> = (0..10).collect();
        for &e in &erasures {
            bad[e] ^= 0xff;
        }
        for k in 0..10 {
            bad[50 + k * 3] ^= 0x11;
        }
        rs.decode(&mut bad, &erasures).unwrap();
        assert_eq!(bad, code);
    }

    #[test]
    fn too_many_erasures_fail() {
        let rs = ReedSolomon::new(30);
        let data = vec![42u8; 225];
        let code = rs.encode(&data);
        let mut bad = code.clone();
        let erasures: Vec<usize> = (0..31).collect();
        assert!(matches!(
            rs.decode(&mut bad, &erasures),
            Err(Error::FecExhausted)
        ));
    }
}
