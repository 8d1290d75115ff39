use rand::Rng;

const CONSONANTS: &[u8] = b"BCDFGHJKLMNPRSTVWYZ";
const VOWELS: &[u8] = b"AEIU";

/// Mint a reservable address: consonant, vowel, consonant, then 100..=999.
pub fn generate_address<R: Rng>(rng: &mut R) -> String {
    let pick = |rng: &mut R, set: &[u8]| set[rng.gen_range(0..set.len())] as char;
    let mut address = String::with_capacity(6);
    address.push(pick(rng, CONSONANTS));
    address.push(pick(rng, VOWELS));
    address.push(pick(rng, CONSONANTS));
    address.push_str(&rng.gen_range(100..1000).to_string());
    address
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_addresses_have_fixed_shape() {
        let mut rng = rand::thread_rng();
        for _ in 0..200 {
            let address = generate_address(&mut rng);
            let bytes = address.as_bytes();
            assert_eq!(bytes.len(), 6, "{}", address);
            assert!(CONSONANTS.contains(&bytes[0]));
            assert!(VOWELS.contains(&bytes[1]));
            assert!(CONSONANTS.contains(&bytes[2]));
            let digits: u32 = address[3..].parse().unwrap();
            assert!((100..=999).contains(&digits));
        }
    }
}
