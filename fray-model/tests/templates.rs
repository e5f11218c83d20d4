//! End-to-end template scenarios: default renders, dependent fields, and the
//! mutate/reset contract over nested structures.

use fray_model::encoders;
use fray_model::{
    Computed, Container, DynamicField, Node, NumField, RandomBytesField, StaticField, Template,
    TextField,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A nested template mixing static, numeric, dynamic and random fields
/// renders its default exactly, and returns to it after mutate + reset.
#[test]
fn nested_structure_default_render() {
    init_logging();
    let expected = b"Th3 L33ter ";
    let mut tpl = Template::new(
        "uut",
        vec![
            Node::from(TextField::new("Th")),
            Node::from(
                NumField::unsigned(3, 20)
                    .unwrap()
                    .with_encoder(encoders::int_decimal())
                    .unwrap(),
            ),
            Node::from(StaticField::new(" ")),
            Node::from(
                Container::group(vec![
                    Node::from(DynamicField::new("hmm", "L3")),
                    Node::from(
                        TextField::new(b"\xde\xd7\xab")
                            .with_encoder(encoders::str_base64_no_newline()),
                    ),
                    Node::from(RandomBytesField::new(" ", 1, 100).unwrap()),
                ])
                .with_name("leeter"),
            ),
        ],
    )
    .unwrap();

    assert_eq!(tpl.render().unwrap().to_bytes(), expected);
    assert!(tpl.mutate());
    tpl.reset();
    assert_eq!(tpl.render().unwrap().to_bytes(), expected);
}

/// A template carrying a whole-message size field and a digest over a padded
/// block: the size covers the size field itself, the pad fills with a
/// repeating byte, and the digest matches the padded block exactly.
#[test]
fn dependent_size_and_digest_fields() {
    init_logging();
    let mut expected = Vec::new();
    expected.extend_from_slice(&[0x00, 0x00, 0x00, 0x74]);
    expected.extend_from_slice(b"HAMBURGER");
    expected.extend_from_slice(&[0xaa; 71]);
    expected.extend_from_slice(
        &hex::decode("f3fea26738d6c1c24bef89e3d7cf68ba48f883084a5382a58666829b18c572a9").unwrap(),
    );

    let mut tpl = Template::new(
        "uut",
        vec![
            Node::from(Computed::size_bytes("uut", 32).with_name("size")),
            Node::from(
                Container::pad(vec![Node::from(TextField::new("HAMBURGER"))], 640, b"\xaa")
                    .unwrap()
                    .with_name("content"),
            ),
            Node::from(Computed::sha256("content").with_name("hash")),
        ],
    )
    .unwrap();

    assert_eq!(tpl.render().unwrap().to_bytes(), expected);
    assert!(tpl.mutate());
    tpl.reset();
    assert_eq!(tpl.render().unwrap().to_bytes(), expected);
}

/// Rendering twice with no intervening mutation yields identical bytes.
#[test]
fn unmutated_render_is_idempotent() {
    let mut tpl = Template::new(
        "t",
        vec![
            Node::from(NumField::unsigned(0xbeef, 32).unwrap().with_name("word")),
            Node::from(Computed::crc32("word").with_name("check")),
            Node::from(RandomBytesField::new(b"!!", 1, 8).unwrap().with_seed(99)),
        ],
    )
    .unwrap();

    assert_eq!(tpl.render().unwrap(), tpl.render().unwrap());
    // still true mid-campaign
    tpl.mutate();
    assert_eq!(tpl.render().unwrap(), tpl.render().unwrap());
}

/// Every variant of a campaign is reproducible: two identically built
/// templates generate the same variant sequence, and reset replays it.
#[test]
fn campaign_replays_bit_exactly() {
    let build = || {
        Template::new(
            "t",
            vec![
                Node::from(NumField::unsigned(5, 8).unwrap().with_name("n")),
                Node::from(RandomBytesField::new(b"r", 2, 6).unwrap().with_seed(42)),
            ],
        )
        .unwrap()
    };
    let mut first = build();
    let mut second = build();

    let run_a: Vec<_> = first.mutations().collect::<Result<_, _>>().unwrap();
    let run_b: Vec<_> = second.mutations().collect::<Result<_, _>>().unwrap();
    assert_eq!(run_a, run_b);

    // a reset campaign replays from the start
    first.reset();
    let run_c: Vec<_> = first.mutations().collect::<Result<_, _>>().unwrap();
    assert_eq!(run_a, run_c);
}

/// User-supplied compute functions and size offsets over a header block.
#[test]
fn calculated_fields_over_rendered_content() {
    let tpl = Template::new(
        "msg",
        vec![
            Node::from(TextField::new("OK\r\n").with_name("status")),
            // header length in bits, plus room for a fixed trailer
            Node::from(
                Computed::size_bits("status", 16)
                    .with_size_offset(8)
                    .unwrap()
                    .with_name("bits"),
            ),
            Node::from(
                Computed::calc_int("status", 8, |bits| {
                    bits.to_bytes().iter().filter(|b| **b == b'\r').count() as i128
                })
                .with_name("crs"),
            ),
            Node::from(
                Computed::calc_str("status", |bits| {
                    bits.to_bytes().to_ascii_lowercase()
                })
                .with_name("echo"),
            ),
        ],
    )
    .unwrap();

    // 32 bits of status + 8 offset = 40, one CR, lowercased echo
    assert_eq!(tpl.render().unwrap().to_bytes(), b"OK\r\n\x00\x28\x01ok\r\n");
}

/// The checksum field tracks mutations of its target and returns with it.
#[test]
fn checksum_follows_target_mutations() {
    let mut tpl = Template::new(
        "t",
        vec![
            Node::from(TextField::new("data").with_name("payload")),
            Node::from(Computed::crc32("payload").with_name("check")),
        ],
    )
    .unwrap();

    let baseline = tpl.render().unwrap().to_bytes();
    assert!(tpl.mutate());
    let mutated = tpl.render().unwrap().to_bytes();
    assert_ne!(baseline, mutated);

    tpl.reset();
    assert_eq!(tpl.render().unwrap().to_bytes(), baseline);
}
