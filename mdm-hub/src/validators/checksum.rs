//! Check-digit validation for Brazilian national identifiers

use crate::utils::text::digits;

/// Modulo-11 check digit as used by CPF
fn cpf_digit(numbers: &[u32]) -> u32 {
    let weight_start = numbers.len() as u32 + 1;
    let sum: u32 = numbers
        .iter()
        .enumerate()
        .map(|(i, d)| d * (weight_start - i as u32))
        .sum();
    let rest = (sum * 10) % 11;
    if rest == 10 {
        0
    } else {
        rest
    }
}

/// Modulo-11 check digit as used by CNPJ (weights cycle 2..=9 from the right)
fn cnpj_digit(numbers: &[u32]) -> u32 {
    let sum: u32 = numbers
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| d * (2 + (i as u32 % 8)))
        .sum();
    let rest = sum % 11;
    if rest < 2 {
        0
    } else {
        11 - rest
    }
}

fn to_numbers(value: &str, expected_len: usize) -> Option<Vec<u32>> {
    let d = digits(value);
    if d.len() != expected_len {
        return None;
    }
    let numbers: Vec<u32> = d.chars().filter_map(|c| c.to_digit(10)).collect();
    // repeated digits pass the arithmetic but are never issued
    if numbers.iter().all(|n| *n == numbers[0]) {
        return None;
    }
    Some(numbers)
}

/// True when a CPF (any punctuation) has valid check digits
pub fn cpf_is_valid(value: &str) -> bool {
    let Some(numbers) = to_numbers(value, 11) else {
        return false;
    };
    cpf_digit(&numbers[..9]) == numbers[9] && cpf_digit(&numbers[..10]) == numbers[10]
}

/// True when a CNPJ (any punctuation) has valid check digits
pub fn cnpj_is_valid(value: &str) -> bool {
    let Some(numbers) = to_numbers(value, 14) else {
        return false;
    };
    cnpj_digit(&numbers[..12]) == numbers[12] && cnpj_digit(&numbers[..13]) == numbers[13]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_cpfs() {
        assert!(cpf_is_valid("529.982.247-25"));
        assert!(cpf_is_valid("12345678909"));
    }

    #[test]
    fn test_invalid_cpfs() {
        assert!(!cpf_is_valid("529.982.247-24"));
        assert!(!cpf_is_valid("111.111.111-11"));
        assert!(!cpf_is_valid("1234"));
    }

    #[test]
    fn test_cnpj() {
        assert!(cnpj_is_valid("11.222.333/0001-81"));
        assert!(!cnpj_is_valid("11.222.333/0001-82"));
        assert!(!cnpj_is_valid("00.000.000/0000-00"));
    }
}
