diesel::table! {
    devices (id) {
        id -> Text,
        name -> Text,
        mode -> Text,
        smell_class -> Text,
        last_seen -> Nullable<Timestamp>,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    floorplans (id) {
        id -> Text,
        name -> Text,
        data -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(devices, floorplans,);
