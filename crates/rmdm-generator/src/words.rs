pub(crate) struct Place {
    pub city: &'static str,
    pub country: &'static str,
    pub code: &'static str,
    pub currency: &'static str,
}

pub(crate) static PLACES: &[Place] = &[
    Place { city: "Paris", country: "France", code: "FR", currency: "EUR" },
    Place { city: "Lyon", country: "France", code: "FR", currency: "EUR" },
    Place { city: "Berlin", country: "Germany", code: "DE", currency: "EUR" },
    Place { city: "Hamburg", country: "Germany", code: "DE", currency: "EUR" },
    Place { city: "Milan", country: "Italy", code: "IT", currency: "EUR" },
    Place { city: "Madrid", country: "Spain", code: "ES", currency: "EUR" },
    Place { city: "Brussels", country: "Belgium", code: "BE", currency: "EUR" },
    Place { city: "Rotterdam", country: "Netherlands", code: "NL", currency: "EUR" },
    Place { city: "Manchester", country: "United Kingdom", code: "GB", currency: "GBP" },
    Place { city: "Zurich", country: "Switzerland", code: "CH", currency: "CHF" },
    Place { city: "Warsaw", country: "Poland", code: "PL", currency: "PLN" },
    Place { city: "Stockholm", country: "Sweden", code: "SE", currency: "SEK" },
    Place { city: "Copenhagen", country: "Denmark", code: "DK", currency: "DKK" },
    Place { city: "Oslo", country: "Norway", code: "NO", currency: "NOK" },
    Place { city: "Prague", country: "Czech Republic", code: "CZ", currency: "CZK" },
    Place { city: "Budapest", country: "Hungary", code: "HU", currency: "HUF" },
    Place { city: "Chicago", country: "USA", code: "US", currency: "USD" },
    Place { city: "Toronto", country: "Canada", code: "CA", currency: "CAD" },
    Place { city: "Sydney", country: "Australia", code: "AU", currency: "AUD" },
    Place { city: "Osaka", country: "Japan", code: "JP", currency: "JPY" },
];

pub(crate) static COMPANY_STEMS: &[&str] = &[
    "Acme", "Globex", "Initech", "Umbrella", "Stark", "Wayne", "Hooli", "Vandelay",
    "Soylent", "Cyberdyne", "Tyrell", "Wonka", "Gringotts", "Oscorp", "Monarch",
    "Nakatomi", "Massive", "Duff", "Bluth", "Pendant",
];

pub(crate) static COMPANY_SUFFIXES: &[&str] = &[
    "Industries", "Holdings", "Group", "Systems", "Partners", "Logistics", "Trading",
    "Solutions", "Labs", "Works",
];

pub(crate) static LEGAL_FORMS: &[&str] = &["SAS", "SARL", "SA", "GmbH", "Ltd"];

pub(crate) static STREETS: &[&str] = &[
    "Main Street", "Station Road", "Rue de la Paix", "Hauptstrasse", "Via Roma",
    "Calle Mayor", "Kings Road", "Harbour Lane", "Market Square", "Mill Lane",
];

pub(crate) static INDUSTRIES: &[&str] = &[
    "Retail", "Manufacturing", "Healthcare", "Finance", "Logistics", "Education",
    "Hospitality", "Construction", "Energy", "Media",
];

pub(crate) static SEGMENTS: &[&str] = &["SME", "Mid-Market", "Enterprise", "Startup"];

pub(crate) static CATEGORIES: &[&str] = &["Computers", "Components", "Accessories"];

pub(crate) static PRODUCT_WORDS: &[&str] = &[
    "Nova", "Orbit", "Pulse", "Vertex", "Quantum", "Echo", "Atlas", "Fusion", "Zen", "Spark",
];

pub(crate) static PRODUCT_TIERS: &[&str] = &["Pro", "Plus", "Max", "Lite", "Go"];

pub(crate) static SERVICES: &[&str] = &[
    "Transport", "Equipment", "Cleaning", "Security", "Consulting", "IT", "Catering",
    "Maintenance", "Construction", "Telecom", "Marketing", "HR", "Logistics",
];
