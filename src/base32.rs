use ::base32::Alphabet;

// RFC 4648 base32, lenient on decode: case-insensitive, unknown characters (whitespace, '=', dashes, etc)
// are skipped and trailing bits that don't fill a whole byte are dropped. Decoding never fails.

fn in_alphabet(c: &char) -> bool {
	matches!(*c, 'A'..='Z' | '2'..='7')
}

pub fn decode(text: &str) -> Vec<u8> {
	let cleaned: String = text
		.chars()
		.map(|c| c.to_ascii_uppercase())
		.filter(in_alphabet)
		.collect();

	::base32::decode(Alphabet::Rfc4648 { padding: false }, &cleaned).unwrap_or_default()
}

pub fn encode(bytes: &[u8]) -> String {
	::base32::encode(Alphabet::Rfc4648 { padding: true }, bytes)
}
