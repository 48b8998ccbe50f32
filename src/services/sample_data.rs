//! Bundled placeholder data served before the installation is first fully
//! configured. Shapes mirror what the real endpoints return.

use serde_json::{json, Value};

pub fn for_category(category: &str) -> Vec<Value> {
    match category {
        "members" => vec![
            json!({
                "character_id": 90000001,
                "location_id": 60003760,
                "ship_type_id": 587,
                "logon_date": "2026-01-01T12:00:00Z",
                "logoff_date": "2026-01-01T15:30:00Z"
            }),
            json!({
                "character_id": 90000002,
                "location_id": 60008494,
                "ship_type_id": 24698,
                "logon_date": "2026-01-02T08:10:00Z",
                "logoff_date": "2026-01-02T09:45:00Z"
            }),
        ],
        "assets" => vec![
            json!({
                "item_id": 1000000016835_i64,
                "type_id": 34,
                "location_id": 60003760,
                "location_flag": "CorpSAG1",
                "location_type": "station",
                "quantity": 250000,
                "is_singleton": false
            }),
            json!({
                "item_id": 1000000016836_i64,
                "type_id": 35,
                "location_id": 60003760,
                "location_flag": "CorpSAG1",
                "location_type": "station",
                "quantity": 80000,
                "is_singleton": false
            }),
        ],
        "industry_jobs" => vec![json!({
            "job_id": 229136101,
            "activity_id": 1,
            "blueprint_type_id": 691,
            "installer_id": 90000001,
            "facility_id": 60006382,
            "runs": 10,
            "status": "active",
            "start_date": "2026-01-01T10:00:00Z",
            "end_date": "2026-01-03T10:00:00Z"
        })],
        "wallet_journal" => vec![
            json!({
                "id": 89000000001_i64,
                "date": "2026-01-01T11:00:00Z",
                "ref_type": "bounty_prizes",
                "amount": 1250000.0,
                "balance": 98750000.0,
                "description": "Bounty prizes"
            }),
            json!({
                "id": 89000000002_i64,
                "date": "2026-01-01T11:20:00Z",
                "ref_type": "market_transaction",
                "amount": -340000.0,
                "balance": 98410000.0,
                "description": "Market purchase"
            }),
        ],
        _ => Vec::new(),
    }
}
