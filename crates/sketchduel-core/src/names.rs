use rand::Rng;
use rand::seq::IndexedRandom;

const ADJECTIVES: &[&str] = &[
    "Swift", "Quiet", "Bold", "Lucky", "Clever", "Gentle", "Brave", "Sly", "Sunny", "Witty",
    "Nimble", "Mellow", "Dapper", "Fuzzy", "Jolly", "Zesty",
];

const ANIMALS: &[&str] = &[
    "Otter", "Heron", "Fox", "Badger", "Lynx", "Puffin", "Gecko", "Marmot", "Falcon", "Koala",
    "Newt", "Panda", "Raven", "Walrus", "Yak", "Ibis",
];

/// Generate a display name like `"Swift Otter 42"`. Names are cosmetic and
/// not guaranteed unique.
pub fn generate_display_name() -> String {
    let mut rng = rand::rng();
    let adjective = ADJECTIVES.choose(&mut rng).copied().unwrap_or("Anonymous");
    let animal = ANIMALS.choose(&mut rng).copied().unwrap_or("Artist");
    let suffix: u16 = rng.random_range(1..100);
    format!("{adjective} {animal} {suffix}")
}
