use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_plants_table::Migration),
            Box::new(m20240101_000002_create_cart_items_table::Migration),
            Box::new(m20240101_000003_create_checkout_intents_table::Migration),
            Box::new(m20240101_000004_create_orders_table::Migration),
            Box::new(m20240101_000005_create_order_items_table::Migration),
            Box::new(m20240101_000006_create_payments_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240101_000001_create_plants_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_plants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Create plants table aligned with entities::plant Model
            manager
                .create_table(
                    Table::create()
                        .table(Plants::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Plants::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Plants::Name).string().not_null())
                        .col(ColumnDef::new(Plants::ScientificName).string().null())
                        .col(ColumnDef::new(Plants::Description).string().null())
                        .col(ColumnDef::new(Plants::Price).decimal().not_null())
                        .col(ColumnDef::new(Plants::Difficulty).string().null())
                        .col(ColumnDef::new(Plants::ImageUrl).string().null())
                        .col(ColumnDef::new(Plants::VendorId).uuid().not_null())
                        .col(
                            ColumnDef::new(Plants::InStock)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Plants::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_plants_vendor_id")
                        .table(Plants::Table)
                        .col(Plants::VendorId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Plants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Plants {
        Table,
        Id,
        Name,
        ScientificName,
        Description,
        Price,
        Difficulty,
        ImageUrl,
        VendorId,
        InStock,
        CreatedAt,
    }
}

mod m20240101_000002_create_cart_items_table {
    use super::m20240101_000001_create_plants_table::Plants;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_cart_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One row per (buyer, plant); quantity merges on repeated adds
            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CartItems::BuyerId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::PlantId).uuid().not_null())
                        .col(
                            ColumnDef::new(CartItems::Quantity)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(ColumnDef::new(CartItems::AddedAt).timestamp().not_null())
                        .col(ColumnDef::new(CartItems::UpdatedAt).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_plant_id")
                                .from(CartItems::Table, CartItems::PlantId)
                                .to(Plants::Table, Plants::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_buyer_plant")
                        .table(CartItems::Table)
                        .col(CartItems::BuyerId)
                        .col(CartItems::PlantId)
                        .unique()
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_buyer_id")
                        .table(CartItems::Table)
                        .col(CartItems::BuyerId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        BuyerId,
        PlantId,
        Quantity,
        AddedAt,
        UpdatedAt,
    }
}

mod m20240101_000003_create_checkout_intents_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000003_create_checkout_intents_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Pending intents keyed by the gateway's intent id; the row is
            // deleted when the intent is materialized into orders, which is
            // what makes duplicate confirmations no-ops
            manager
                .create_table(
                    Table::create()
                        .table(CheckoutIntents::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CheckoutIntents::IntentId)
                                .string()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutIntents::BuyerId).uuid().not_null())
                        .col(
                            ColumnDef::new(CheckoutIntents::AmountMinor)
                                .big_integer()
                                .not_null(),
                        )
                        .col(ColumnDef::new(CheckoutIntents::Currency).string().not_null())
                        .col(ColumnDef::new(CheckoutIntents::Lines).json().not_null())
                        .col(
                            ColumnDef::new(CheckoutIntents::Status)
                                .string()
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(CheckoutIntents::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CheckoutIntents::ExpiresAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_checkout_intents_buyer_id")
                        .table(CheckoutIntents::Table)
                        .col(CheckoutIntents::BuyerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_checkout_intents_expires_at")
                        .table(CheckoutIntents::Table)
                        .col(CheckoutIntents::ExpiresAt)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CheckoutIntents::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum CheckoutIntents {
        Table,
        IntentId,
        BuyerId,
        AmountMinor,
        Currency,
        Lines,
        Status,
        CreatedAt,
        ExpiresAt,
    }
}

mod m20240101_000004_create_orders_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000004_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // One order per vendor per confirmed intent
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::BuyerId).uuid().not_null())
                        .col(ColumnDef::new(Orders::VendorId).uuid().not_null())
                        .col(
                            ColumnDef::new(Orders::Status)
                                .string()
                                .not_null()
                                .default("pending"),
                        )
                        .col(ColumnDef::new(Orders::TotalAmount).decimal().not_null())
                        .col(ColumnDef::new(Orders::OrderDate).timestamp().not_null())
                        .col(ColumnDef::new(Orders::DeliveryDate).timestamp().null())
                        .col(ColumnDef::new(Orders::TrackingNumber).string().null())
                        .col(ColumnDef::new(Orders::Notes).string().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_buyer_id")
                        .table(Orders::Table)
                        .col(Orders::BuyerId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_vendor_id")
                        .table(Orders::Table)
                        .col(Orders::VendorId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_status")
                        .table(Orders::Table)
                        .col(Orders::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        BuyerId,
        VendorId,
        Status,
        TotalAmount,
        OrderDate,
        DeliveryDate,
        TrackingNumber,
        Notes,
    }
}

mod m20240101_000005_create_order_items_table {
    use super::m20240101_000004_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000005_create_order_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // price_per_unit is the price snapshot taken at intent creation,
            // not the live plant price
            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::PlantId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(ColumnDef::new(OrderItems::PricePerUnit).decimal().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order_id")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        PlantId,
        Quantity,
        PricePerUnit,
    }
}

mod m20240101_000006_create_payments_table {
    use super::m20240101_000004_create_orders_table::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000006_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Exactly one payment row per order; (transaction_id, order_id)
            // unique so a replayed confirmation cannot double-record
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(
                            ColumnDef::new(Payments::OrderId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::PaymentMethod).string().not_null())
                        .col(ColumnDef::new(Payments::Amount).decimal().not_null())
                        .col(ColumnDef::new(Payments::PaymentStatus).string().not_null())
                        .col(ColumnDef::new(Payments::TransactionId).string().not_null())
                        .col(ColumnDef::new(Payments::PaymentDate).timestamp().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order_id")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_transaction_order")
                        .table(Payments::Table)
                        .col(Payments::TransactionId)
                        .col(Payments::OrderId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        PaymentMethod,
        Amount,
        PaymentStatus,
        TransactionId,
        PaymentDate,
    }
}
