//! Esquema Diesel (mantenido a mano, reemplazable con `diesel print-schema`).
//!
//! Todas las tablas comparten el trío `record_id` (único) / `created` /
//! `deleted` (tombstone unix, 0 = viva). `id` es el autoincremental que da el
//! orden estable de inserción a las consultas.

diesel::table! {
    f_flow (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        code -> Text,
        version -> BigInt,
        name -> Text,
        type_code -> Text,
        status -> SmallInt,
        flag -> SmallInt,
        memo -> Text,
        content_hash -> Text,
    }
}

diesel::table! {
    f_node (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        flow_id -> Text,
        code -> Text,
        name -> Text,
        type_code -> Text,
        form_id -> Nullable<Text>,
        order_num -> BigInt,
    }
}

diesel::table! {
    f_node_router (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        source_node_id -> Text,
        target_node_id -> Text,
        expression -> Text,
        explain -> Text,
    }
}

diesel::table! {
    f_node_assignment (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        node_id -> Text,
        expression -> Text,
    }
}

diesel::table! {
    f_node_property (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        node_id -> Text,
        name -> Text,
        value -> Text,
    }
}

diesel::table! {
    f_form (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        flow_id -> Text,
        type_code -> Text,
        data -> Text,
    }
}

diesel::table! {
    f_flow_instance (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        flow_id -> Text,
        launcher -> Text,
        launch_time -> BigInt,
        status -> SmallInt,
    }
}

diesel::table! {
    f_node_instance (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        flow_instance_id -> Text,
        node_id -> Text,
        prev_node_instance_id -> Nullable<Text>,
        input_data -> Binary,
        out_data -> Binary,
        processor -> Nullable<Text>,
        process_time -> Nullable<BigInt>,
        status -> SmallInt,
    }
}

diesel::table! {
    f_node_candidate (id) {
        id -> BigInt,
        record_id -> Text,
        created -> BigInt,
        deleted -> BigInt,
        node_instance_id -> Text,
        candidate_id -> Text,
    }
}

diesel::allow_tables_to_appear_in_same_query!(f_flow,
                                              f_node,
                                              f_node_router,
                                              f_node_assignment,
                                              f_node_property,
                                              f_form,
                                              f_flow_instance,
                                              f_node_instance,
                                              f_node_candidate,);
