//! FM instrument records from the PMD voice table

use serde::Serialize;

/// One FM operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct FmOperator {
    pub dt: u8,
    pub mul: u8,
    pub tl: u8,
    pub ks: u8,
    pub ar: u8,
    pub am: u8,
    pub dr: u8,
    pub sr: u8,
    pub sl: u8,
    pub rr: u8,
}

/// Operator set and connection, without the PMD id.
///
/// Two voices compare equal when every register value matches, which is
/// what instrument deduplication keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FmVoice {
    pub alg: u8,
    pub fb: u8,
    /// Register slot order (1, 3, 2, 4)
    pub operators: [FmOperator; 4],
}

impl Default for FmVoice {
    /// Plain sine-ish voice used when a module carries no voice table
    fn default() -> Self {
        let op = FmOperator {
            mul: 1,
            tl: 127,
            ar: 31,
            dr: 0,
            sl: 0,
            rr: 15,
            ..Default::default()
        };
        let carrier = FmOperator { tl: 0, ..op };
        Self {
            alg: 7,
            fb: 0,
            operators: [carrier; 4],
        }
    }
}

/// A PMD `@` definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FmInstrument {
    pub id: u8,
    pub voice: FmVoice,
}

impl FmInstrument {
    /// Id byte plus 25 register bytes
    pub const RECORD_SIZE: usize = 26;

    /// Decode one table record; `record` must hold at least RECORD_SIZE bytes
    pub fn parse(record: &[u8]) -> Option<Self> {
        if record.len() < Self::RECORD_SIZE {
            return None;
        }
        let id = record[0];
        let regs = &record[1..Self::RECORD_SIZE];

        let mut operators = [FmOperator::default(); 4];
        for (slot, op) in operators.iter_mut().enumerate() {
            let dt_mul = regs[slot];
            let ks_ar = regs[8 + slot];
            let am_dr = regs[12 + slot];
            let sl_rr = regs[20 + slot];
            *op = FmOperator {
                dt: (dt_mul >> 4) & 0x07,
                mul: dt_mul & 0x0F,
                tl: regs[4 + slot] & 0x7F,
                ks: (ks_ar >> 6) & 0x03,
                ar: ks_ar & 0x1F,
                am: (am_dr >> 7) & 0x01,
                dr: am_dr & 0x1F,
                sr: regs[16 + slot] & 0x1F,
                sl: (sl_rr >> 4) & 0x0F,
                rr: sl_rr & 0x0F,
            };
        }

        let fb_alg = regs[24];
        Some(Self {
            id,
            voice: FmVoice {
                alg: fb_alg & 0x07,
                fb: (fb_alg >> 3) & 0x07,
                operators,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_record() {
        let mut record = vec![0x02];
        record.extend_from_slice(&[0x71, 0x02, 0x33, 0x01]); // DT/MUL
        record.extend_from_slice(&[0x23, 0x2D, 0x26, 0x00]); // TL
        record.extend_from_slice(&[0x5F, 0x99, 0x1F, 0x94]); // KS/AR
        record.extend_from_slice(&[0x85, 0x05, 0x05, 0x07]); // AM/DR
        record.extend_from_slice(&[0x02, 0x02, 0x02, 0x02]); // SR
        record.extend_from_slice(&[0x11, 0x11, 0x11, 0xA6]); // SL/RR
        record.push(0x3A); // FB 7, ALG 2

        let ins = FmInstrument::parse(&record).unwrap();
        assert_eq!(ins.id, 2);
        assert_eq!(ins.voice.alg, 2);
        assert_eq!(ins.voice.fb, 7);

        let op1 = ins.voice.operators[0];
        assert_eq!((op1.dt, op1.mul), (7, 1));
        assert_eq!(op1.tl, 0x23);
        assert_eq!((op1.ks, op1.ar), (1, 0x1F));
        assert_eq!((op1.am, op1.dr), (1, 5));

        let op4 = ins.voice.operators[3];
        assert_eq!((op4.ks, op4.ar), (2, 0x14));
        assert_eq!((op4.sl, op4.rr), (0x0A, 0x06));
    }

    #[test]
    fn test_short_record() {
        assert!(FmInstrument::parse(&[0; 25]).is_none());
    }

    #[test]
    fn test_voice_equality_ignores_id() {
        let mut a = vec![1u8];
        a.extend_from_slice(&[0x21; 25]);
        let mut b = a.clone();
        b[0] = 9;
        let a = FmInstrument::parse(&a).unwrap();
        let b = FmInstrument::parse(&b).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.voice, b.voice);
    }
}
