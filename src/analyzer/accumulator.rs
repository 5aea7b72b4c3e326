use crate::document::Node;
use crate::model::{BrandPeriodStats, NEW_MODEL_YEAR, PriceInfo};
use crate::utils::parse_price;
use tracing::debug;

/// Folds one catalog document into the running statistics of its brand.
///
/// Malformed models and year entries are skipped; nothing here fails.
/// The caller finalizes `stats` once the whole period has been folded.
pub fn fold(stats: &mut BrandPeriodStats, document: &Node) {
    let Some(models) = document.get_list("models") else {
        return;
    };

    for model in models {
        let (Some(model_code), Some(model_name)) =
            (model.get_i32("modelCode"), model.get_str("modelName"))
        else {
            continue;
        };

        if !stats.distinct_model_codes.insert(model_code) {
            debug!("Model code {} repeated in period {}", model_code, stats.period_id);
        }

        let Some(years) = model.get_list("years") else {
            continue;
        };
        for entry in years {
            if entry.get_i32("year") != Some(NEW_MODEL_YEAR) {
                continue;
            }
            stats.total_models_with_new_pricing += 1;

            let Some(price) = entry.get_str("price").and_then(|p| parse_price(p).ok()) else {
                continue;
            };
            stats.total_new_vehicles_priced += 1;
            stats.new_price_sum += price;

            // Strict comparisons: the first model seen at a given price keeps it.
            if price < stats.cheapest_new.value {
                stats.cheapest_new = PriceInfo::new(model_name, price);
            }
            if price > stats.priciest_new.value {
                stats.priciest_new = PriceInfo::new(model_name, price);
            }
        }
    }
}
