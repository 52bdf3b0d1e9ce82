//! Transaction mass: a weighted sum of serialized size, output script
//! sizes and signature operations.

pub const MASS_PER_TX_BYTE: u64 = 1;
pub const MASS_PER_SCRIPT_PUB_KEY_BYTE: u64 = 10;
pub const MASS_PER_SIG_OP: u64 = 1000;

/// Sig op count assumed for a multisig whose key count cannot be read.
const MAX_PUB_KEYS_PER_MULTISIG: u64 = 20;

const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1: u8 = 0x51;
const OP_16: u8 = 0x60;
const OP_EQUAL: u8 = 0x87;
const OP_BLAKE2B: u8 = 0xaa;
const OP_CHECKSIG: u8 = 0xac;
const OP_CHECKSIGVERIFY: u8 = 0xad;
const OP_CHECKMULTISIG: u8 = 0xae;
const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;
const OP_DATA_32: u8 = 0x20;

/// An input's signature script together with the script it spends.
#[derive(Debug, Clone, Copy)]
pub struct SpentScript<'a> {
    pub signature_script: &'a [u8],
    pub previous_script_pub_key: &'a [u8],
}

pub fn transaction_mass(
    serialized_size: u64,
    output_scripts: &[&[u8]],
    inputs: &[SpentScript<'_>],
    is_coinbase: bool,
) -> u64 {
    let size_mass = serialized_size * MASS_PER_TX_BYTE;
    if is_coinbase {
        return size_mass;
    }

    let script_pub_key_size: u64 = output_scripts.iter().map(|script| script.len() as u64).sum();
    let sig_ops: u64 = inputs
        .iter()
        .map(|input| precise_sig_op_count(input.signature_script, input.previous_script_pub_key))
        .sum();

    size_mass + script_pub_key_size * MASS_PER_SCRIPT_PUB_KEY_BYTE + sig_ops * MASS_PER_SIG_OP
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Opcode<'a> {
    code: u8,
    data: &'a [u8],
}

/// Parses as many opcodes as are well formed.
fn parse_script(script: &[u8]) -> (Vec<Opcode<'_>>, bool) {
    let mut opcodes = Vec::new();
    let mut offset = 0;
    while offset < script.len() {
        let code = script[offset];
        offset += 1;

        let (len_bytes, data_len) = match code {
            0x01..=0x4b => (0, code as usize),
            OP_PUSHDATA1 | OP_PUSHDATA2 | OP_PUSHDATA4 => {
                let len_bytes = match code {
                    OP_PUSHDATA1 => 1,
                    OP_PUSHDATA2 => 2,
                    _ => 4,
                };
                let Some(len_slice) = script.get(offset..offset + len_bytes) else {
                    return (opcodes, false);
                };
                let data_len = len_slice
                    .iter()
                    .rev()
                    .fold(0usize, |acc, byte| (acc << 8) | *byte as usize);
                (len_bytes, data_len)
            }
            _ => (0, 0),
        };

        offset += len_bytes;
        let Some(data) = script.get(offset..offset + data_len) else {
            return (opcodes, false);
        };
        offset += data_len;
        opcodes.push(Opcode { code, data });
    }
    (opcodes, true)
}

fn sig_op_count(opcodes: &[Opcode<'_>]) -> u64 {
    let mut count = 0;
    let mut previous: Option<u8> = None;
    for opcode in opcodes {
        match opcode.code {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count += 1,
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                count += match previous {
                    Some(code @ OP_1..=OP_16) => u64::from(code - OP_1 + 1),
                    _ => MAX_PUB_KEYS_PER_MULTISIG,
                };
            }
            _ => {}
        }
        previous = Some(opcode.code);
    }
    count
}

fn is_pay_to_script_hash(opcodes: &[Opcode<'_>]) -> bool {
    matches!(
        opcodes,
        [Opcode { code: OP_BLAKE2B, .. }, Opcode { code: OP_DATA_32, data }, Opcode { code: OP_EQUAL, .. }]
            if data.len() == 32
    )
}

fn is_push_only(opcodes: &[Opcode<'_>]) -> bool {
    opcodes.iter().all(|opcode| opcode.code <= OP_16)
}

/// Sig ops executed when `signature_script` spends `script_pub_key`. For
/// pay-to-script-hash the redeem script (last push of the signature script)
/// is counted instead.
pub fn precise_sig_op_count(signature_script: &[u8], script_pub_key: &[u8]) -> u64 {
    let (opcodes, _) = parse_script(script_pub_key);
    if !is_pay_to_script_hash(&opcodes) {
        return sig_op_count(&opcodes);
    }

    let (sig_opcodes, well_formed) = parse_script(signature_script);
    if !well_formed || !is_push_only(&sig_opcodes) {
        return 0;
    }
    match sig_opcodes.last() {
        Some(redeem) => sig_op_count(&parse_script(redeem.data).0),
        None => 0,
    }
}
