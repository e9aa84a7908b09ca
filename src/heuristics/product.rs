use once_cell::sync::Lazy;

/// Instruction phrases that mark a short text as a shipping note rather than
/// something the customer ordered.
const SHIPPING_INSTRUCTIONS: &[&str] = &[
    "tiene un envio",
    "tienen un envio",
    "tiene un envío",
    "tienen un envío",
    "a nombre de yupii",
    "a nombre de",
    "donde sea",
    "sin producto",
    "no aplica",
    "efectivo",
    "transferencia",
    "pago",
    "deposito",
];

/// Placeholder tokens left behind by empty cells and spreadsheet exports.
const NULL_TOKENS: &[&str] = &["-", "nan", "null", "none"];

/// Only texts shorter than this are rejected for containing an instruction.
const INSTRUCTION_MAX_LEN: usize = 25;

static PRODUCT_KEYWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let food = [
        "pizza", "hamburguesa", "burger", "pollo", "carne", "pescado", "pasta", "espagueti",
        "lasaña", "ensalada", "sopa", "sandwich", "taco", "burrito", "quesadilla", "empanada",
        "arepa", "hot dog", "papas", "patatas", "french fries", "combo", "menu", "menú",
        "desayuno", "almuerzo", "cena", "bebida", "refresco", "jugo", "cerveza", "agua", "café",
        "té", "smoothie", "milkshake", "helado", "postre", "torta", "pastel", "galleta", "donut",
        "pan", "bread", "arroz", "frijoles", "beans", "verdura",
    ];
    let services = [
        "recarga", "pago de", "servicio", "factura", "bill", "cuenta", "deposito", "retiro",
        "giro", "remesa", "envio de dinero",
    ];
    let retail = [
        "producto", "articulo", "item", "medicamento", "medicina", "shampoo", "jabon", "crema",
        "perfume", "maquillaje", "ropa", "zapatos", "accesorio", "libro", "revista",
        "electronico", "telefono", "cargador", "cable",
    ];
    let brands = [
        "coca cola", "pepsi", "sprite", "fanta", "mcdonalds", "kfc", "burger king", "subway",
        "dominos", "pizza hut", "starbucks",
    ];
    food.into_iter()
        .chain(services)
        .chain(retail)
        .chain(brands)
        .collect()
});

const NUMBERED_ITEM_WORDS: &[&str] = &["combo", "menu", "menú", "#", "no.", "item"];
const CONNECTORS: &[&str] = &["con", "de", "y", "sin", "extra", "adicional"];
const LOGISTICS_WORDS: &[&str] = &["envio", "entregar", "recoger", "cliente", "direccion"];

/// A candidate text prepared once and shared by every rule.
pub struct Candidate<'a> {
    pub text: &'a str,
    pub lower: String,
    pub len: usize,
}

impl<'a> Candidate<'a> {
    fn new(raw: &'a str) -> Self {
        let text = raw.trim();
        Self {
            text,
            lower: text.to_lowercase(),
            len: text.chars().count(),
        }
    }

    fn contains_any(&self, words: &[&str]) -> bool {
        words.iter().any(|w| self.lower.contains(w))
    }

    /// Mirrors "all cased characters are uppercase, and there is at least one".
    fn is_shouting(&self) -> bool {
        let mut cased = self
            .text
            .chars()
            .filter(|c| c.is_uppercase() || c.is_lowercase())
            .peekable();
        cased.peek().is_some() && cased.all(char::is_uppercase)
    }
}

/// One step of the decision list.
pub struct Rule {
    pub name: &'static str,
    pub applies: fn(&Candidate) -> bool,
    pub valid: bool,
}

/// Evaluated top to bottom; the first rule that applies decides. Later rules
/// only ever see texts that fell through every earlier one.
pub static RULES: &[Rule] = &[
    Rule {
        name: "empty",
        applies: |c| c.text.is_empty() || NULL_TOKENS.contains(&c.lower.as_str()),
        valid: false,
    },
    Rule {
        name: "shipping_instruction",
        applies: |c| c.len < INSTRUCTION_MAX_LEN && c.contains_any(SHIPPING_INSTRUCTIONS),
        valid: false,
    },
    Rule {
        name: "too_short",
        applies: |c| c.len < 3,
        valid: false,
    },
    Rule {
        name: "keyword",
        applies: |c| PRODUCT_KEYWORDS.iter().any(|k| c.lower.contains(k)),
        valid: true,
    },
    Rule {
        name: "numbered_item",
        applies: |c| {
            c.text.chars().any(|ch| ch.is_ascii_digit()) && c.contains_any(NUMBERED_ITEM_WORDS)
        },
        valid: true,
    },
    Rule {
        name: "described_dish",
        applies: |c| c.contains_any(CONNECTORS) && c.len > 10,
        valid: true,
    },
    Rule {
        name: "free_text",
        applies: |c| {
            c.len > 8 && !c.contains_any(LOGISTICS_WORDS) && (!c.is_shouting() || c.len > 15)
        },
        valid: true,
    },
    Rule {
        name: "long_text",
        applies: |c| c.len > 15,
        valid: true,
    },
];

/// Verdict plus the rule that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub valid: bool,
    pub rule: &'static str,
}

pub fn classify_product<'a>(text: impl Into<Option<&'a str>>) -> Verdict {
    let Some(raw) = text.into() else {
        return Verdict { valid: false, rule: "absent" };
    };
    let candidate = Candidate::new(raw);
    RULES
        .iter()
        .find(|rule| (rule.applies)(&candidate))
        .map(|rule| Verdict { valid: rule.valid, rule: rule.name })
        .unwrap_or(Verdict { valid: false, rule: "fallthrough" })
}

/// Whether `text` names something the customer actually ordered.
pub fn is_valid_product<'a>(text: impl Into<Option<&'a str>>) -> bool {
    classify_product(text).valid
}
