//! Category symbol resolution from element tags.

use std::collections::HashMap;

/// Symbol used when no namespace applies
pub const DEFAULT_SYMBOL: &str = "currency_bitcoin";

const CUISINE: &[(&str, &str)] = &[
    ("burger", "lunch_dining"),
    ("pizza", "local_pizza"),
    ("coffee_shop", "local_cafe"),
    ("coffee", "local_cafe"),
    ("ice_cream", "icecream"),
    ("sushi", "set_meal"),
    ("seafood", "set_meal"),
    ("ramen", "ramen_dining"),
    ("noodle", "ramen_dining"),
    ("bakery", "bakery_dining"),
    ("breakfast", "brunch_dining"),
    ("brunch", "brunch_dining"),
    ("kebab", "kebab_dining"),
    ("chicken", "kebab_dining"),
    ("tea", "emoji_food_beverage"),
    ("bubble_tea", "emoji_food_beverage"),
    ("juice", "local_drink"),
    ("steak_house", "outdoor_grill"),
    ("barbecue", "outdoor_grill"),
    ("dessert", "cake"),
    ("cake", "cake"),
    ("vegan", "eco"),
    ("vegetarian", "eco"),
];

const SHOP: &[(&str, &str)] = &[
    ("supermarket", "local_grocery_store"),
    ("convenience", "local_convenience_store"),
    ("grocery", "local_grocery_store"),
    ("bakery", "bakery_dining"),
    ("clothes", "storefront"),
    ("shoes", "storefront"),
    ("boutique", "storefront"),
    ("hairdresser", "content_cut"),
    ("beauty", "spa"),
    ("cosmetics", "spa"),
    ("computer", "computer"),
    ("electronics", "devices"),
    ("mobile_phone", "smartphone"),
    ("jewelry", "diamond"),
    ("books", "menu_book"),
    ("florist", "local_florist"),
    ("car_repair", "car_repair"),
    ("car", "directions_car"),
    ("bicycle", "pedal_bike"),
    ("alcohol", "liquor"),
    ("wine", "wine_bar"),
    ("butcher", "set_meal"),
    ("pet", "pets"),
    ("optician", "visibility"),
    ("furniture", "chair"),
    ("hardware", "hardware"),
    ("doityourself", "hardware"),
    ("tattoo", "brush"),
    ("travel_agency", "luggage"),
    ("gift", "redeem"),
    ("toys", "toys"),
    ("laundry", "local_laundry_service"),
    ("photo", "photo_camera"),
];

const SPORT: &[(&str, &str)] = &[
    ("fitness", "fitness_center"),
    ("yoga", "self_improvement"),
    ("soccer", "sports_soccer"),
    ("tennis", "sports_tennis"),
    ("golf", "golf_course"),
    ("swimming", "pool"),
    ("scuba_diving", "scuba_diving"),
    ("surfing", "surfing"),
    ("climbing", "hiking"),
    ("martial_arts", "sports_martial_arts"),
    ("bowling", "sports"),
];

const TOURISM: &[(&str, &str)] = &[
    ("hotel", "hotel"),
    ("motel", "hotel"),
    ("hostel", "bed"),
    ("guest_house", "bed"),
    ("apartment", "apartment"),
    ("camp_site", "camping"),
    ("museum", "museum"),
    ("gallery", "palette"),
    ("attraction", "attractions"),
    ("information", "info"),
    ("viewpoint", "landscape"),
];

const HEALTHCARE: &[(&str, &str)] = &[
    ("dentist", "dentistry"),
    ("doctor", "medical_services"),
    ("clinic", "medical_services"),
    ("hospital", "local_hospital"),
    ("pharmacy", "local_pharmacy"),
    ("physiotherapist", "accessibility"),
    ("psychotherapist", "psychology"),
    ("optometrist", "visibility"),
];

const CRAFT: &[(&str, &str)] = &[
    ("carpenter", "carpenter"),
    ("electrician", "electrical_services"),
    ("plumber", "plumbing"),
    ("photographer", "photo_camera"),
    ("brewery", "sports_bar"),
    ("winery", "wine_bar"),
    ("tailor", "checkroom"),
    ("shoemaker", "storefront"),
    ("jeweller", "diamond"),
];

const AMENITY: &[(&str, &str)] = &[
    ("restaurant", "restaurant"),
    ("fast_food", "fastfood"),
    ("cafe", "local_cafe"),
    ("bar", "local_bar"),
    ("pub", "sports_bar"),
    ("ice_cream", "icecream"),
    ("atm", "local_atm"),
    ("bank", "account_balance"),
    ("bureau_de_change", "currency_exchange"),
    ("fuel", "local_gas_station"),
    ("charging_station", "ev_station"),
    ("parking", "local_parking"),
    ("car_rental", "car_rental"),
    ("car_wash", "local_car_wash"),
    ("pharmacy", "local_pharmacy"),
    ("dentist", "dentistry"),
    ("doctors", "medical_services"),
    ("clinic", "medical_services"),
    ("hospital", "local_hospital"),
    ("veterinary", "pets"),
    ("school", "school"),
    ("university", "school"),
    ("college", "school"),
    ("kindergarten", "child_care"),
    ("library", "local_library"),
    ("cinema", "theaters"),
    ("theatre", "theater_comedy"),
    ("nightclub", "nightlife"),
    ("place_of_worship", "church"),
    ("post_office", "local_post_office"),
    ("townhall", "account_balance"),
    ("coworking_space", "group_work"),
    ("taxi", "local_taxi"),
];

const OFFICE: &[(&str, &str)] = &[
    ("company", "business"),
    ("it", "computer"),
    ("lawyer", "gavel"),
    ("accountant", "calculate"),
    ("financial", "account_balance"),
    ("estate_agent", "real_estate_agent"),
    ("insurance", "security"),
    ("coworking", "group_work"),
    ("travel_agent", "luggage"),
    ("architect", "architecture"),
    ("consulting", "business_center"),
];

const PLACE: &[(&str, &str)] = &[
    ("farm", "agriculture"),
    ("island", "beach_access"),
    ("square", "location_city"),
];

const LEISURE: &[(&str, &str)] = &[
    ("fitness_centre", "fitness_center"),
    ("sports_centre", "sports"),
    ("park", "park"),
    ("playground", "toys"),
    ("marina", "sailing"),
    ("golf_course", "golf_course"),
    ("swimming_pool", "pool"),
    ("escape_game", "extension"),
    ("amusement_arcade", "videogame_asset"),
    ("hackerspace", "memory"),
];

const BUILDING: &[(&str, &str)] = &[
    ("house", "home"),
    ("residential", "home"),
    ("apartments", "apartment"),
    ("commercial", "business"),
    ("office", "business"),
    ("retail", "storefront"),
    ("hotel", "hotel"),
    ("church", "church"),
    ("farm", "agriculture"),
];

const COMPANY: &[(&str, &str)] = &[
    ("transport", "local_shipping"),
    ("logistics", "local_shipping"),
    ("software", "computer"),
    ("construction", "construction"),
    ("marketing", "campaign"),
];

/// Namespaces in the order they are consulted
const NAMESPACES: &[(&str, &[(&str, &str)])] = &[
    ("cuisine", CUISINE),
    ("shop", SHOP),
    ("sport", SPORT),
    ("tourism", TOURISM),
    ("healthcare", HEALTHCARE),
    ("craft", CRAFT),
    ("amenity", AMENITY),
    ("office", OFFICE),
    ("place", PLACE),
    ("leisure", LEISURE),
    ("building", BUILDING),
    ("company", COMPANY),
];

fn lookup(table: &[(&str, &'static str)], value: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(value))
        .map(|(_, symbol)| *symbol)
}

/// Pick the display symbol for a tag set.
///
/// The first namespace holding a non-empty value decides. Multi-valued tags
/// (`a;b` or `a,b`) resolve to their first sub-value known to that namespace's
/// table, else to [`DEFAULT_SYMBOL`].
pub fn resolve_symbol(tags: &HashMap<String, String>) -> &'static str {
    for (namespace, table) in NAMESPACES {
        let Some(value) = tags
            .get(*namespace)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
        else {
            continue;
        };

        return value
            .split([';', ','])
            .map(str::trim)
            .find_map(|sub_value| lookup(table, sub_value))
            .unwrap_or(DEFAULT_SYMBOL);
    }

    DEFAULT_SYMBOL
}
