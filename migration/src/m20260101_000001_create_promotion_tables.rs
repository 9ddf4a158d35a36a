use sea_orm_migration::prelude::*;

/// 秒杀活动
#[derive(DeriveIden)]
enum SeckillActivities {
    Table,
    Id,
    Title,
    Status,
    IsEnabled,
    Rules,
    CreatedAt,
    UpdatedAt,
}

/// 秒杀场次（一个活动下多个时间窗口）
#[derive(DeriveIden)]
enum SeckillSessions {
    Table,
    Id,
    ActivityId,
    StartTime,
    EndTime,
    Status,
    MaxQuantityPerUser,
    TotalQuantity,
    SoldQuantity,
    IsEnabled,
    CreatedAt,
    UpdatedAt,
}

/// 场次内的秒杀商品（库存单元）
#[derive(DeriveIden)]
enum SeckillProducts {
    Table,
    Id,
    SessionId,
    ProductId,
    ProductSkuId,
    OriginalPrice,
    SeckillPrice,
    Quantity,
    SoldQuantity,
    MaxQuantityPerUser,
    IsEnabled,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SeckillOrders {
    Table,
    Id,
    OrderId,
    SessionId,
    SeckillProductId,
    MemberId,
    Quantity,
    OriginalPrice,
    SeckillPrice,
    Status,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

/// 拼团活动（库存单元）
#[derive(DeriveIden)]
enum GroupBuys {
    Table,
    Id,
    Title,
    ProductId,
    SkuId,
    OriginalPrice,
    GroupPrice,
    MinPeople,
    MaxPeople,
    MaxQuantityPerUser,
    ExpireHours,
    TotalQuantity,
    SoldQuantity,
    GroupCount,
    SuccessGroupCount,
    Status,
    IsEnabled,
    StartTime,
    EndTime,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum GroupBuyOrders {
    Table,
    Id,
    GroupNo,
    GroupBuyId,
    OrderId,
    MemberId,
    Quantity,
    GroupPrice,
    IsLeader,
    Status,
    ExpireTime,
    GroupTime,
    PaidAt,
    CreatedAt,
    UpdatedAt,
}

/// 通用商城订单（准入时与活动订单同一事务写入）
#[derive(DeriveIden)]
enum Orders {
    Table,
    Id,
    MemberId,
    OrderType,
    TotalAmount,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveMigrationName)]
pub struct Migration;

fn id_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .big_integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

fn counter_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col).integer().not_null().default(0).to_owned()
}

fn status_col<T: IntoIden>(col: T, default: &str) -> ColumnDef {
    ColumnDef::new(col)
        .string_len(16)
        .not_null()
        .default(default)
        .to_owned()
}

fn timestamp_col<T: IntoIden>(col: T) -> ColumnDef {
    ColumnDef::new(col)
        .timestamp_with_time_zone()
        .not_null()
        .default(Expr::cust("NOW()"))
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SeckillActivities::Table)
                    .if_not_exists()
                    .col(&mut id_col(SeckillActivities::Id))
                    .col(
                        ColumnDef::new(SeckillActivities::Title)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(&mut status_col(SeckillActivities::Status, "pending"))
                    .col(
                        ColumnDef::new(SeckillActivities::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(ColumnDef::new(SeckillActivities::Rules).json_binary().null())
                    .col(&mut timestamp_col(SeckillActivities::CreatedAt))
                    .col(&mut timestamp_col(SeckillActivities::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SeckillSessions::Table)
                    .if_not_exists()
                    .col(&mut id_col(SeckillSessions::Id))
                    .col(
                        ColumnDef::new(SeckillSessions::ActivityId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillSessions::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillSessions::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(&mut status_col(SeckillSessions::Status, "pending"))
                    .col(&mut counter_col(SeckillSessions::MaxQuantityPerUser))
                    .col(&mut counter_col(SeckillSessions::TotalQuantity))
                    .col(&mut counter_col(SeckillSessions::SoldQuantity))
                    .col(
                        ColumnDef::new(SeckillSessions::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(&mut timestamp_col(SeckillSessions::CreatedAt))
                    .col(&mut timestamp_col(SeckillSessions::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_seckill_sessions_activity")
                            .from(SeckillSessions::Table, SeckillSessions::ActivityId)
                            .to(SeckillActivities::Table, SeckillActivities::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 定时推进按 (status, start_time) 扫描
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_sessions_status_start")
                    .table(SeckillSessions::Table)
                    .col(SeckillSessions::Status)
                    .col(SeckillSessions::StartTime)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SeckillProducts::Table)
                    .if_not_exists()
                    .col(&mut id_col(SeckillProducts::Id))
                    .col(
                        ColumnDef::new(SeckillProducts::SessionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::ProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::ProductSkuId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::OriginalPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillProducts::SeckillPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(&mut counter_col(SeckillProducts::Quantity))
                    .col(&mut counter_col(SeckillProducts::SoldQuantity))
                    .col(&mut counter_col(SeckillProducts::MaxQuantityPerUser))
                    .col(
                        ColumnDef::new(SeckillProducts::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(&mut timestamp_col(SeckillProducts::CreatedAt))
                    .col(&mut timestamp_col(SeckillProducts::UpdatedAt))
                    .check(Expr::col(SeckillProducts::SoldQuantity).lte(Expr::col(SeckillProducts::Quantity)))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_seckill_products_session")
                            .from(SeckillProducts::Table, SeckillProducts::SessionId)
                            .to(SeckillSessions::Table, SeckillSessions::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // 同一场次内一个 SKU 只能上架一次
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_products_session_sku_unique")
                    .table(SeckillProducts::Table)
                    .col(SeckillProducts::SessionId)
                    .col(SeckillProducts::ProductSkuId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_products_product")
                    .table(SeckillProducts::Table)
                    .col(SeckillProducts::ProductId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Orders::Table)
                    .if_not_exists()
                    .col(&mut id_col(Orders::Id))
                    .col(ColumnDef::new(Orders::MemberId).big_integer().not_null())
                    .col(ColumnDef::new(Orders::OrderType).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Orders::TotalAmount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(&mut status_col(Orders::Status, "pending"))
                    .col(&mut timestamp_col(Orders::CreatedAt))
                    .col(&mut timestamp_col(Orders::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SeckillOrders::Table)
                    .if_not_exists()
                    .col(&mut id_col(SeckillOrders::Id))
                    .col(ColumnDef::new(SeckillOrders::OrderId).big_integer().not_null())
                    .col(
                        ColumnDef::new(SeckillOrders::SessionId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillOrders::SeckillProductId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillOrders::MemberId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(SeckillOrders::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(SeckillOrders::OriginalPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SeckillOrders::SeckillPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(&mut status_col(SeckillOrders::Status, "pending"))
                    .col(
                        ColumnDef::new(SeckillOrders::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(&mut timestamp_col(SeckillOrders::CreatedAt))
                    .col(&mut timestamp_col(SeckillOrders::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_seckill_orders_order")
                            .from(SeckillOrders::Table, SeckillOrders::OrderId)
                            .to(Orders::Table, Orders::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_seckill_orders_product")
                            .from(SeckillOrders::Table, SeckillOrders::SeckillProductId)
                            .to(SeckillProducts::Table, SeckillProducts::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // 限购统计按 (session_id, member_id) 读取
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_orders_session_member")
                    .table(SeckillOrders::Table)
                    .col(SeckillOrders::SessionId)
                    .col(SeckillOrders::MemberId)
                    .to_owned(),
            )
            .await?;

        // 支付超时扫描
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_seckill_orders_status_created")
                    .table(SeckillOrders::Table)
                    .col(SeckillOrders::Status)
                    .col(SeckillOrders::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GroupBuys::Table)
                    .if_not_exists()
                    .col(&mut id_col(GroupBuys::Id))
                    .col(ColumnDef::new(GroupBuys::Title).string_len(255).not_null())
                    .col(ColumnDef::new(GroupBuys::ProductId).big_integer().not_null())
                    .col(ColumnDef::new(GroupBuys::SkuId).big_integer().not_null())
                    .col(
                        ColumnDef::new(GroupBuys::OriginalPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(GroupBuys::GroupPrice).big_integer().not_null())
                    .col(ColumnDef::new(GroupBuys::MinPeople).integer().not_null())
                    .col(&mut counter_col(GroupBuys::MaxPeople))
                    .col(&mut counter_col(GroupBuys::MaxQuantityPerUser))
                    .col(ColumnDef::new(GroupBuys::ExpireHours).integer().not_null())
                    .col(&mut counter_col(GroupBuys::TotalQuantity))
                    .col(&mut counter_col(GroupBuys::SoldQuantity))
                    .col(&mut counter_col(GroupBuys::GroupCount))
                    .col(&mut counter_col(GroupBuys::SuccessGroupCount))
                    .col(&mut status_col(GroupBuys::Status, "pending"))
                    .col(
                        ColumnDef::new(GroupBuys::IsEnabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(GroupBuys::StartTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupBuys::EndTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(&mut timestamp_col(GroupBuys::CreatedAt))
                    .col(&mut timestamp_col(GroupBuys::UpdatedAt))
                    .check(Expr::col(GroupBuys::SoldQuantity).lte(Expr::col(GroupBuys::TotalQuantity)))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GroupBuyOrders::Table)
                    .if_not_exists()
                    .col(&mut id_col(GroupBuyOrders::Id))
                    .col(ColumnDef::new(GroupBuyOrders::GroupNo).string_len(32).not_null())
                    .col(
                        ColumnDef::new(GroupBuyOrders::GroupBuyId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(GroupBuyOrders::OrderId).big_integer().not_null())
                    .col(
                        ColumnDef::new(GroupBuyOrders::MemberId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(GroupBuyOrders::Quantity).integer().not_null())
                    .col(
                        ColumnDef::new(GroupBuyOrders::GroupPrice)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupBuyOrders::IsLeader)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(&mut status_col(GroupBuyOrders::Status, "pending"))
                    .col(
                        ColumnDef::new(GroupBuyOrders::ExpireTime)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(GroupBuyOrders::GroupTime)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(GroupBuyOrders::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(&mut timestamp_col(GroupBuyOrders::CreatedAt))
                    .col(&mut timestamp_col(GroupBuyOrders::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_group_buy_orders_group_buy")
                            .from(GroupBuyOrders::Table, GroupBuyOrders::GroupBuyId)
                            .to(GroupBuys::Table, GroupBuys::Id),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_group_buy_orders_order")
                            .from(GroupBuyOrders::Table, GroupBuyOrders::OrderId)
                            .to(Orders::Table, Orders::Id),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_group_buy_orders_group_no")
                    .table(GroupBuyOrders::Table)
                    .col(GroupBuyOrders::GroupNo)
                    .to_owned(),
            )
            .await?;

        // 过期扫描
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_group_buy_orders_status_expire")
                    .table(GroupBuyOrders::Table)
                    .col(GroupBuyOrders::Status)
                    .col(GroupBuyOrders::ExpireTime)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // 先删引用方
        manager
            .drop_table(Table::drop().if_exists().table(GroupBuyOrders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(GroupBuys::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(SeckillOrders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(Orders::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(SeckillProducts::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(SeckillSessions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().if_exists().table(SeckillActivities::Table).to_owned())
            .await?;
        Ok(())
    }
}
